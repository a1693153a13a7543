use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt::Display;

/// Kind of entity a prediction was asked about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    User,
    Channel,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::User => write!(f, "user"),
            EntityKind::Channel => write!(f, "channel"),
        }
    }
}

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// The id was not part of the snapshot the model was fitted on.
    #[error("Unknown {kind}: {id}")]
    UnknownEntity { kind: EntityKind, id: String },

    #[error("Upstream fetch failed: {0}")]
    UpstreamFetch(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Merged activity counts no longer fit a non-negative integer.
    #[error("Activity merge inconsistency for user {user_id} in channel {channel_id}")]
    MergeInconsistency { user_id: String, channel_id: String },

    #[error("Recommendation pass was cancelled")]
    Cancelled,

    #[error("Recommendations are still being computed")]
    ComputeInProgress,

    #[error("Recommendation pass did not finish within {0} seconds")]
    ComputeTimedOut(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn unknown_user(id: &str) -> Self {
        AppError::UnknownEntity {
            kind: EntityKind::User,
            id: id.to_string(),
        }
    }

    pub fn unknown_channel(id: &str) -> Self {
        AppError::UnknownEntity {
            kind: EntityKind::Channel,
            id: id.to_string(),
        }
    }

    /// True for errors raised by the key-value backends
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            AppError::Persistence(_) | AppError::Database(_) | AppError::Redis(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::UnknownEntity { .. } => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::ComputeInProgress => (StatusCode::CONFLICT, self.to_string()),
            AppError::ComputeTimedOut(_) => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            AppError::UpstreamFetch(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::HttpClient(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::Database(_)
            | AppError::Redis(_)
            | AppError::Persistence(_)
            | AppError::MergeInconsistency { .. }
            | AppError::Cancelled
            | AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_entity_display() {
        assert_eq!(
            AppError::unknown_channel("town-square").to_string(),
            "Unknown channel: town-square"
        );
        assert_eq!(AppError::unknown_user("u1").to_string(), "Unknown user: u1");
    }

    #[test]
    fn test_is_persistence() {
        assert!(AppError::Persistence("boom".to_string()).is_persistence());
        assert!(!AppError::UpstreamFetch("boom".to_string()).is_persistence());
        assert!(!AppError::Cancelled.is_persistence());
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AppError::ComputeInProgress, StatusCode::CONFLICT),
            (AppError::ComputeTimedOut(60), StatusCode::GATEWAY_TIMEOUT),
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::UpstreamFetch("x".into()), StatusCode::BAD_GATEWAY),
            (AppError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (AppError::Persistence("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}

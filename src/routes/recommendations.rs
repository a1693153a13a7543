use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::AppResult,
    models::{Channel, PassState, PassSummary, ResetMode},
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ScopeQuery {
    pub team_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetQuery {
    pub team_id: Option<String>,
    /// Also drop the activity baseline and rewind the cursor
    #[serde(default)]
    pub global: bool,
}

#[derive(Debug, Serialize)]
pub struct RecommendationsResponse {
    pub user_id: String,
    pub scope: String,
    pub channels: Vec<Channel>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: PassState,
}

/// Handler for reading a user's recommended channels
pub async fn list(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> AppResult<Json<RecommendationsResponse>> {
    let scope = state.service.scope_for(query.team_id.as_deref())?;
    let channels = state.service.get_recommendations(&user_id, &scope).await?;

    Ok(Json(RecommendationsResponse {
        user_id,
        scope: scope.to_string(),
        channels,
    }))
}

/// Handler for clearing a user's recommendations
pub async fn reset(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<ResetQuery>,
) -> AppResult<StatusCode> {
    let scope = state.service.scope_for(query.team_id.as_deref())?;
    let mode = if query.global {
        ResetMode::Global
    } else {
        ResetMode::User
    };

    state.service.reset(&user_id, &scope, mode).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for a manual recompute bounded by the configured timeout
pub async fn compute(State(state): State<AppState>) -> AppResult<Json<PassSummary>> {
    let summary = state.service.compute_now(state.compute_timeout).await?;
    Ok(Json(summary))
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        state: state.service.status(),
    })
}

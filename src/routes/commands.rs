use axum::{extract::State, Form, Json};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    routes::AppState,
    services::command::{self, CommandAction},
};

/// Outgoing slash command webhook payload
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub text: String,
    pub user_id: String,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub response_type: &'static str,
    pub text: String,
}

/// Handler for the `/suggest` slash command webhook
///
/// Replies are ephemeral so only the caller sees them.
pub async fn execute(
    State(state): State<AppState>,
    Form(request): Form<CommandRequest>,
) -> AppResult<Json<CommandResponse>> {
    if let Some(expected) = &state.command_token {
        if request.token.as_deref() != Some(expected.as_str()) {
            return Err(AppError::Unauthorized("Invalid command token".to_string()));
        }
    }

    let line = format!("{} {}", request.command, request.text);
    let action = CommandAction::parse(&line).ok_or_else(|| {
        AppError::InvalidInput(format!("Unsupported command {}", request.command))
    })?;

    tracing::info!(
        user_id = %request.user_id,
        channel_id = request.channel_id.as_deref().unwrap_or(""),
        ?action,
        "Slash command"
    );

    let team_id = request.team_id.as_deref().filter(|t| !t.is_empty());
    let text = command::execute(
        &state.service,
        &action,
        &request.user_id,
        team_id,
        state.compute_timeout,
    )
    .await;

    Ok(Json(CommandResponse {
        response_type: "ephemeral",
        text,
    }))
}

use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::middleware::{make_span_with_request_id, request_id_middleware};
use crate::services::RecommendationService;

pub mod commands;
pub mod recommendations;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RecommendationService>,
    /// How long a manual compute waits before replying "still computing"
    pub compute_timeout: Duration,
    /// Expected slash command token; `None` accepts any caller
    pub command_token: Option<String>,
}

impl AppState {
    pub fn new(service: Arc<RecommendationService>, config: &Config) -> Self {
        Self {
            service,
            compute_timeout: config.compute_timeout(),
            command_token: config.command_token.clone(),
        }
    }
}

/// Creates the application router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes())
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id)),
        )
        .with_state(state)
}

/// API routes under /api/v1
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/recommendations/status", get(recommendations::status))
        .route("/recommendations/compute", post(recommendations::compute))
        .route(
            "/recommendations/:user_id",
            get(recommendations::list).delete(recommendations::reset),
        )
        .route("/commands", post(commands::execute))
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

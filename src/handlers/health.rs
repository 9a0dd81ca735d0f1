use std::sync::Arc;

use axum::{extract::State, Json};
use tracing::debug;

use crate::models::{HealthResponse, ReadyResponse};
use crate::AppState;

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
    })
}

/// Readiness check endpoint; reports the number of live websocket sessions
pub async fn ready_check(State(app_state): State<Arc<AppState>>) -> Json<ReadyResponse> {
    debug!("Readiness check requested");
    let stats = app_state.hub.stats().await;
    let message = if app_state.config.jwt_secret.is_some() {
        "Service is ready"
    } else {
        "Service is up but no JWT secret is configured"
    };
    Json(ReadyResponse {
        status: "ok".to_string(),
        message: message.to_string(),
        sessions: stats.sessions as u32,
    })
}

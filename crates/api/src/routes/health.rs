use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    pub success: bool,
    /// Overall service status.
    pub status: &'static str,
    /// Whether the generation engine answered its readiness probe.
    pub engine_status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
}

/// GET /health -- returns service and engine health.
///
/// Probes the engine but never starts it.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let engine_ready = state.supervisor.is_ready().await;

    Json(HealthResponse {
        success: true,
        status: if engine_ready { "ok" } else { "degraded" },
        engine_status: if engine_ready { "online" } else { "offline" },
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Mount the health check route.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

//! Health check routes.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};

use crate::api::server::AppState;
use crate::metrics::SystemHealth;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/live", get(liveness_check))
}

/// Full report derived from recent scrape cycles.
async fn health_check(State(state): State<AppState>) -> Json<SystemHealth> {
    Json(state.health.check_all())
}

/// Readiness check - has a recent cycle succeeded?
/// Returns HTTP 200 if healthy/degraded, HTTP 503 if unhealthy/unknown.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.health.check_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/// Liveness check - is the process responsive?
async fn liveness_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.health.uptime().as_secs();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "alive",
            "uptime_secs": uptime
        })),
    )
}

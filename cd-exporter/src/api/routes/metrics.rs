//! Prometheus scrape route.

use axum::{Router, extract::State, http::header, response::IntoResponse, routing::get};

use crate::api::server::AppState;
use crate::metrics::CONTENT_TYPE;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(metrics))
}

/// Render every lifecycle-state metric and the error counter.
async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], state.exporter.export())
}

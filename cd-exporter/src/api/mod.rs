//! HTTP exposition layer.
//!
//! Serves the Prometheus scrape endpoint and the health routes with axum.

pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};

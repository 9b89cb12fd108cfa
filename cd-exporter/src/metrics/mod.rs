//! Metrics and monitoring module.
//!
//! Holds the published per-state values, renders them in Prometheus text
//! format and tracks scrape health.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use cd_exporter::domain::LifecycleState;
//! use cd_exporter::metrics::{MetricsStore, PrometheusExporter, UpdateDiscipline};
//!
//! let store = Arc::new(MetricsStore::new(&LifecycleState::defaults(), UpdateDiscipline::Delta));
//! store.publish(&LifecycleState::new("HOLD")?, 3);
//!
//! let exporter = PrometheusExporter::new(store);
//! println!("{}", exporter.export());
//! ```

mod health;
mod prometheus;
mod store;

pub use health::{
    HealthChecker, HealthStatus, LastScrape, OutcomeKind, ScrapeHealth, SystemHealth,
    UNHEALTHY_AFTER_FAILURES,
};
pub use prometheus::{CONTENT_TYPE, DEFAULT_NAMESPACE, PrometheusExporter};
pub use store::{MetricsStore, StateValue, StoreSnapshot, UpdateDiscipline};

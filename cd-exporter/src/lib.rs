//! cd-exporter library crate.
//!
//! Counts IBM Connect:Direct processes per lifecycle state and exposes the
//! counts for Prometheus. The binary wires these modules together; they are
//! public for integration testing.

pub mod api;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod scraper;
pub mod session;

pub use error::{Error, Result};

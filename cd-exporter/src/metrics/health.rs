//! Health check implementation.
//!
//! Health is derived from the outcome of recent scrape cycles rather than
//! from probing the node on demand.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::store::MetricsStore;
use crate::scraper::ScrapePhase;

/// Consecutive failed cycles after which the exporter reports unhealthy.
pub const UNHEALTHY_AFTER_FAILURES: u32 = 3;

/// Health status of the exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Last cycle produced data (or an empty queue).
    Healthy,
    /// Recent cycles failed, but fewer than [`UNHEALTHY_AFTER_FAILURES`].
    Degraded,
    /// Collection keeps failing.
    Unhealthy,
    /// No cycle has completed yet.
    #[default]
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Kind of outcome a scrape cycle ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Counts,
    NoData,
    Failure,
}

/// Record of the most recent completed cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastScrape {
    pub outcome: OutcomeKind,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Scrape section of the health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeHealth {
    pub phase: ScrapePhase,
    pub last_outcome: Option<OutcomeKind>,
    pub last_scrape_at: Option<String>,
    pub last_duration_ms: Option<u64>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub scrape_errors_total: u64,
}

/// Overall exporter health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_secs: u64,
    pub scrape: ScrapeHealth,
}

/// Tracks scrape progress for the health routes.
///
/// Written by the scraper, read by HTTP handlers.
#[derive(Debug)]
pub struct HealthChecker {
    store: Arc<MetricsStore>,
    phase: AtomicU8,
    consecutive_failures: AtomicU32,
    last: RwLock<Option<LastScrape>>,
    start_time: Instant,
    version: String,
}

impl HealthChecker {
    pub fn new(store: Arc<MetricsStore>) -> Self {
        Self {
            store,
            phase: AtomicU8::new(ScrapePhase::Idle as u8),
            consecutive_failures: AtomicU32::new(0),
            last: RwLock::new(None),
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn set_phase(&self, phase: ScrapePhase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
    }

    pub fn phase(&self) -> ScrapePhase {
        ScrapePhase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    /// Record a completed cycle. Returns the consecutive failure count after
    /// this cycle.
    pub fn record(&self, outcome: OutcomeKind, duration: Duration, error: Option<String>) -> u32 {
        let failures = if outcome == OutcomeKind::Failure {
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            0
        };

        *self.last.write() = Some(LastScrape {
            outcome,
            finished_at: Utc::now(),
            duration_ms: duration.as_millis() as u64,
            error,
        });

        failures
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn last_scrape(&self) -> Option<LastScrape> {
        self.last.read().clone()
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Current status without building the full report.
    pub fn status(&self) -> HealthStatus {
        if self.last.read().is_none() {
            return HealthStatus::Unknown;
        }
        match self.consecutive_failures() {
            0 => HealthStatus::Healthy,
            n if n < UNHEALTHY_AFTER_FAILURES => HealthStatus::Degraded,
            _ => HealthStatus::Unhealthy,
        }
    }

    pub fn check_ready(&self) -> bool {
        matches!(self.status(), HealthStatus::Healthy | HealthStatus::Degraded)
    }

    /// Build the full health report.
    pub fn check_all(&self) -> SystemHealth {
        let last = self.last_scrape();
        SystemHealth {
            status: self.status(),
            version: self.version.clone(),
            uptime_secs: self.uptime().as_secs(),
            scrape: ScrapeHealth {
                phase: self.phase(),
                last_outcome: last.as_ref().map(|l| l.outcome),
                last_scrape_at: last.as_ref().map(|l| l.finished_at.to_rfc3339()),
                last_duration_ms: last.as_ref().map(|l| l.duration_ms),
                last_error: last.and_then(|l| l.error),
                consecutive_failures: self.consecutive_failures(),
                scrape_errors_total: self.store.scrape_errors(),
            },
        }
    }
}

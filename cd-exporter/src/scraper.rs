//! Scrape orchestration.
//!
//! One background task runs the cycle `Idle -> Collecting -> Classifying ->
//! Publishing -> Idle`, then waits the configured interval before the next.
//! Every collection failure is contained here: it bumps the error counter,
//! leaves the published per-state values alone and is retried next cycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classifier::{StateCounts, classify};
use crate::domain::LifecycleState;
use crate::metrics::{HealthChecker, MetricsStore, OutcomeKind};
use crate::session::{JobListing, JobSource, SessionError};

/// Where the scraper currently is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum ScrapePhase {
    #[default]
    Idle = 0,
    Collecting = 1,
    Classifying = 2,
    Publishing = 3,
}

impl ScrapePhase {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Collecting,
            2 => Self::Classifying,
            3 => Self::Publishing,
            _ => Self::Idle,
        }
    }
}

/// How a single cycle ended.
#[derive(Debug)]
pub enum ScrapeOutcome {
    /// Output was classified and the counts published.
    Counts(StateCounts),
    /// The node had nothing to list; every state was published as zero.
    NoData,
    /// Collection failed; only the error counter changed.
    Failure(SessionError),
}

impl ScrapeOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Counts(_) => OutcomeKind::Counts,
            Self::NoData => OutcomeKind::NoData,
            Self::Failure(_) => OutcomeKind::Failure,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

/// Drives scrape cycles against a [`JobSource`] and publishes into the store.
pub struct Scraper {
    source: Arc<dyn JobSource>,
    store: Arc<MetricsStore>,
    health: Arc<HealthChecker>,
    states: Vec<LifecycleState>,
    interval: Duration,
}

impl Scraper {
    /// Scrapes every state the store was built with.
    pub fn new(
        source: Arc<dyn JobSource>,
        store: Arc<MetricsStore>,
        health: Arc<HealthChecker>,
        interval: Duration,
    ) -> Self {
        let states = store.states().cloned().collect();
        Self {
            source,
            store,
            health,
            states,
            interval,
        }
    }

    /// Run one full cycle. Never fails; the outcome is returned for callers
    /// that want to inspect it.
    pub async fn scrape_once(&self) -> ScrapeOutcome {
        let started = Instant::now();

        self.health.set_phase(ScrapePhase::Collecting);
        let outcome = match self.source.fetch_job_listing().await {
            Ok(JobListing::Raw(output)) => {
                debug!(output = %output, "Raw job listing");

                self.health.set_phase(ScrapePhase::Classifying);
                let counts = classify(&output, &self.states);

                self.health.set_phase(ScrapePhase::Publishing);
                self.store.publish_counts(&counts);
                ScrapeOutcome::Counts(counts)
            }
            Ok(JobListing::NoData) => {
                self.health.set_phase(ScrapePhase::Publishing);
                self.store.publish_zero();
                ScrapeOutcome::NoData
            }
            Err(e) => {
                self.store.increment_errors();
                ScrapeOutcome::Failure(e)
            }
        };
        self.health.set_phase(ScrapePhase::Idle);

        let elapsed = started.elapsed();
        let error_message = match &outcome {
            ScrapeOutcome::Failure(e) => Some(e.to_string()),
            _ => None,
        };
        let failures = self.health.record(outcome.kind(), elapsed, error_message);
        self.log_outcome(&outcome, elapsed, failures);

        outcome
    }

    fn log_outcome(&self, outcome: &ScrapeOutcome, elapsed: Duration, failures: u32) {
        let duration_ms = elapsed.as_millis() as u64;
        match outcome {
            ScrapeOutcome::Counts(counts) => {
                info!(duration_ms, total = counts.total(), "Scrape completed: {}", counts);
            }
            ScrapeOutcome::NoData => {
                warn!(duration_ms, "No process data returned, all states reset to 0");
            }
            ScrapeOutcome::Failure(e) => {
                error!(
                    error = %e,
                    consecutive_failures = failures,
                    errors_total = self.store.scrape_errors(),
                    "Scrape failed"
                );
            }
        }
    }

    /// Run cycles until `cancel` fires. The first cycle starts immediately;
    /// each later one starts `interval` after the previous one finished.
    /// A cycle already in progress is allowed to finish.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            source = %self.source.describe(),
            interval_secs = self.interval.as_secs(),
            discipline = %self.store.discipline(),
            states = self.states.len(),
            "Scraper started"
        );

        while !cancel.is_cancelled() {
            self.scrape_once().await;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Scraper stopped");
    }

    /// Spawn [`Scraper::run`] on the runtime.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{HealthStatus, UpdateDiscipline};
    use crate::session::MockJobSource;

    fn harness(
        source: MockJobSource,
        discipline: UpdateDiscipline,
    ) -> (Scraper, Arc<MetricsStore>, Arc<HealthChecker>) {
        let store = Arc::new(MetricsStore::new(&LifecycleState::defaults(), discipline));
        let health = Arc::new(HealthChecker::new(store.clone()));
        let scraper = Scraper::new(
            Arc::new(source),
            store.clone(),
            health.clone(),
            Duration::from_millis(10),
        );
        (scraper, store, health)
    }

    fn values(store: &MetricsStore) -> Vec<(String, i64)> {
        store
            .snapshot()
            .states
            .into_iter()
            .map(|v| (v.state.token().to_string(), v.value))
            .collect()
    }

    #[tokio::test]
    async fn test_counts_are_published() {
        let mut source = MockJobSource::new();
        source
            .expect_fetch_job_listing()
            .times(1)
            .returning(|| Ok(JobListing::Raw("EXECHOLDTIMERWAITEXEC".into())));

        let (scraper, store, health) = harness(source, UpdateDiscipline::Absolute);
        let outcome = scraper.scrape_once().await;

        assert_eq!(outcome.kind(), OutcomeKind::Counts);
        assert_eq!(
            values(&store),
            vec![
                ("HOLD".into(), 1),
                ("WAIT".into(), 1),
                ("TIMER".into(), 1),
                ("EXEC".into(), 2),
            ]
        );
        assert_eq!(store.scrape_errors(), 0);
        assert_eq!(health.status(), HealthStatus::Healthy);
        assert_eq!(health.phase(), ScrapePhase::Idle);
    }

    #[tokio::test]
    async fn test_failure_only_counts_error() {
        let mut calls = 0;
        let mut source = MockJobSource::new();
        source.expect_fetch_job_listing().times(2).returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(JobListing::Raw("HOLD HOLD WAIT".into()))
            } else {
                Err(SessionError::Authentication {
                    status: 401,
                    message: "denied".into(),
                })
            }
        });

        let (scraper, store, health) = harness(source, UpdateDiscipline::Delta);
        scraper.scrape_once().await;
        let before = values(&store);

        let outcome = scraper.scrape_once().await;

        assert!(outcome.is_failure());
        assert_eq!(values(&store), before);
        assert_eq!(store.scrape_errors(), 1);
        assert_eq!(health.status(), HealthStatus::Degraded);
        let last = health.last_scrape().unwrap();
        assert!(last.error.unwrap().contains("denied"));
    }

    #[tokio::test]
    async fn test_no_data_resets_all_states() {
        let mut calls = 0;
        let mut source = MockJobSource::new();
        source.expect_fetch_job_listing().times(2).returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(JobListing::Raw("EXEC EXEC TIMER".into()))
            } else {
                Ok(JobListing::NoData)
            }
        });

        let (scraper, store, _health) = harness(source, UpdateDiscipline::Delta);
        scraper.scrape_once().await;
        let outcome = scraper.scrape_once().await;

        assert_eq!(outcome.kind(), OutcomeKind::NoData);
        assert!(values(&store).iter().all(|(_, v)| *v == 0));
        assert_eq!(store.scrape_errors(), 0);
    }

    #[tokio::test]
    async fn test_repeated_failures_turn_unhealthy() {
        let mut source = MockJobSource::new();
        source
            .expect_fetch_job_listing()
            .times(3)
            .returning(|| Err(SessionError::Protocol("garbled".into())));

        let (scraper, store, health) = harness(source, UpdateDiscipline::Absolute);
        for _ in 0..3 {
            scraper.scrape_once().await;
        }

        assert_eq!(store.scrape_errors(), 3);
        assert_eq!(health.consecutive_failures(), 3);
        assert_eq!(health.status(), HealthStatus::Unhealthy);
    }

    /// Collects formatted log lines in memory.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_first_failure_logs_error_with_cause() {
        let mut source = MockJobSource::new();
        source
            .expect_fetch_job_listing()
            .times(1)
            .returning(|| Err(SessionError::Protocol("garbled reply".into())));
        let (scraper, _store, _health) = harness(source, UpdateDiscipline::Absolute);

        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        scraper.scrape_once().await;

        let output = logs.contents();
        let line = output
            .lines()
            .find(|l| l.contains("Scrape failed"))
            .unwrap_or_else(|| panic!("no failure line in {output:?}"));
        assert!(line.contains("ERROR"), "{line}");
        assert!(line.contains("garbled reply"), "{line}");
        assert!(line.contains("consecutive_failures=1"), "{line}");
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let mut source = MockJobSource::new();
        source
            .expect_fetch_job_listing()
            .returning(|| Ok(JobListing::NoData));
        source.expect_describe().return_const("mock".to_string());

        let (scraper, _store, health) = harness(source, UpdateDiscipline::Absolute);
        let scraper = Arc::new(scraper);
        let cancel = CancellationToken::new();
        let handle = scraper.clone().spawn(cancel.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scraper did not stop")
            .unwrap();

        assert_eq!(health.status(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let mut source = MockJobSource::new();
        source.expect_fetch_job_listing().never();
        source.expect_describe().return_const("mock".to_string());

        let (scraper, _store, health) = harness(source, UpdateDiscipline::Absolute);
        let cancel = CancellationToken::new();
        cancel.cancel();
        scraper.run(cancel).await;

        assert_eq!(health.status(), HealthStatus::Unknown);
    }

    #[test]
    fn test_phase_round_trips_through_u8() {
        for phase in [
            ScrapePhase::Idle,
            ScrapePhase::Collecting,
            ScrapePhase::Classifying,
            ScrapePhase::Publishing,
        ] {
            assert_eq!(ScrapePhase::from_u8(phase as u8), phase);
        }
        assert_eq!(ScrapePhase::from_u8(200), ScrapePhase::Idle);
        assert_eq!(ScrapePhase::Classifying.to_string(), "classifying");
        assert_eq!(ScrapePhase::Idle.to_string(), "idle");
    }
}

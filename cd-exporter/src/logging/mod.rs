//! Tracing subscriber setup.
//!
//! Console output always; a daily-rolling `cd-exporter.log` when a log
//! directory is configured, with rolled files pruned after 7 days.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, NaiveDate, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Default log filter directive, used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_LOG_FILTER: &str = "cd_exporter=info,tower_http=warn,reqwest=warn";

/// Base name of the rolling log file; rolled files get a `.YYYY-MM-DD` suffix.
pub const LOG_FILE_NAME: &str = "cd-exporter.log";

/// Log retention period in days.
const LOG_RETENTION_DAYS: i64 = 7;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Timestamps in the host's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// File logging handle. Keep it alive for the lifetime of the process, or
/// buffered lines are lost.
pub struct LogFiles {
    log_dir: PathBuf,
    _guard: WorkerGuard,
}

impl LogFiles {
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Prune rolled files once now and then daily until cancelled.
    pub fn start_retention_cleanup(&self, cancel_token: CancellationToken) {
        let log_dir = self.log_dir.clone();

        tokio::spawn(async move {
            loop {
                if let Err(e) = cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS).await {
                    warn!(error = %e, "Failed to cleanup old logs");
                }

                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Log retention cleanup task shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(CLEANUP_INTERVAL) => {}
                }
            }
        });
    }
}

/// Install the global subscriber.
///
/// Returns a [`LogFiles`] handle when `log_dir` is set.
pub fn init_logging(log_dir: Option<&Path>) -> crate::Result<Option<LogFiles>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let (file_layer, files) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(LocalTimer);
            let files = LogFiles {
                log_dir: dir.to_path_buf(),
                _guard: guard,
            };
            (Some(layer), Some(files))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(file_layer)
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
        })?;

    Ok(files)
}

/// Delete rolled log files older than `retention_days`.
async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<usize> {
    let cutoff = Utc::now().date_naive() - chrono::Duration::days(retention_days);
    let prefix = format!("{LOG_FILE_NAME}.");

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(file_date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|name| name.strip_prefix(&prefix))
            .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
        else {
            continue;
        };

        if file_date < cutoff {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    deleted += 1;
                    debug!(path = %path.display(), "Deleted old log file");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to delete old log file");
                }
            }
        }
    }

    if deleted > 0 {
        info!(count = deleted, "Cleaned up old log files");
    }

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert!(DEFAULT_LOG_FILTER.contains("cd_exporter=info"));
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired_rolled_files() {
        let dir = tempfile::tempdir().unwrap();
        let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();

        let expired = dir.path().join("cd-exporter.log.2001-01-01");
        let current = dir.path().join(format!("cd-exporter.log.{today}"));
        let unrelated = dir.path().join("other.log.2001-01-01");
        let garbled = dir.path().join("cd-exporter.log.yesterday");
        for path in [&expired, &current, &unrelated, &garbled] {
            std::fs::write(path, "line\n").unwrap();
        }

        let deleted = cleanup_old_logs(dir.path(), LOG_RETENTION_DAYS).await.unwrap();

        assert_eq!(deleted, 1);
        assert!(!expired.exists());
        assert!(current.exists());
        assert!(unrelated.exists());
        assert!(garbled.exists());
    }

    #[tokio::test]
    async fn test_cleanup_missing_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        assert!(cleanup_old_logs(&missing, LOG_RETENTION_DAYS).await.is_err());
    }
}

//! Command-line arguments.

use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{ArgAction, CommandFactory, Parser};

use crate::config::{
    Backend, ConfigError, DEFAULT_HTTP_PORT, DEFAULT_NODE_PORT, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_SCRAPE_INTERVAL_SECS, ExporterConfig, TransportProtocol,
};
use crate::metrics::{DEFAULT_NAMESPACE, UpdateDiscipline};

const EXAMPLE: &str = "Example:\n  cd-exporter --ipaddress=192.168.1.13 --user=admin --password=password123 \\\n    --cdws-server=https://localhost:9443 --port=1363 --protocol=TLS12 \\\n    --http-port=9402 --scrape-interval=60";

/// Prometheus exporter for the IBM Connect:Direct process queue.
#[derive(Debug, Parser)]
#[command(name = "cd-exporter", version, about, after_help = EXAMPLE)]
pub struct Args {
    /// Connect:Direct node address
    #[arg(long, env = "CD_EXPORTER_IPADDRESS")]
    pub ipaddress: Option<String>,

    /// Connect:Direct user
    #[arg(long, env = "CD_EXPORTER_USER")]
    pub user: Option<String>,

    /// Connect:Direct password
    #[arg(long, env = "CD_EXPORTER_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Connect:Direct API port
    #[arg(long, env = "CD_EXPORTER_PORT", default_value_t = DEFAULT_NODE_PORT)]
    pub port: u16,

    /// Transport security: TCPIP, TLS12 or TLS13
    #[arg(long, env = "CD_EXPORTER_PROTOCOL", default_value = "TCPIP")]
    pub protocol: TransportProtocol,

    /// Port serving /metrics
    #[arg(long, env = "CD_EXPORTER_HTTP_PORT", default_value_t = DEFAULT_HTTP_PORT)]
    pub http_port: u16,

    /// Address serving /metrics
    #[arg(long, env = "CD_EXPORTER_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Seconds between scrape cycles
    #[arg(long, env = "CD_EXPORTER_SCRAPE_INTERVAL", default_value_t = DEFAULT_SCRAPE_INTERVAL_SECS)]
    pub scrape_interval: u64,

    /// How the job listing is collected: rest or cli
    #[arg(long, env = "CD_EXPORTER_BACKEND", default_value = "rest")]
    pub backend: Backend,

    /// Connect:Direct Web Services base URL (rest backend)
    #[arg(long, env = "CD_EXPORTER_CDWS_SERVER")]
    pub cdws_server: Option<String>,

    /// Accept invalid Web Services TLS certificates
    #[arg(long, env = "CD_EXPORTER_CDWS_INSECURE", action = ArgAction::SetTrue)]
    pub cdws_insecure: bool,

    /// Seconds before a remote call is abandoned
    #[arg(long, env = "CD_EXPORTER_REQUEST_TIMEOUT", default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout: u64,

    /// Connect:Direct installation root (cli backend)
    #[arg(long, env = "CD_EXPORTER_BASE_PATH")]
    pub base_path: Option<PathBuf>,

    /// Metric update discipline: absolute or delta
    #[arg(long, env = "CD_EXPORTER_UPDATE_MODE", default_value = "absolute")]
    pub update_mode: UpdateDiscipline,

    /// Metric name prefix
    #[arg(long, env = "CD_EXPORTER_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Comma-separated lifecycle state tokens to count
    #[arg(long, env = "CD_EXPORTER_STATES", default_value = "HOLD,WAIT,TIMER,EXEC")]
    pub states: String,

    /// Directory for daily-rotated log files
    #[arg(long, env = "CD_EXPORTER_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

impl Args {
    /// Validate into an [`ExporterConfig`], or print usage and exit with
    /// status 2 the way clap does for its own parse errors.
    pub fn into_config_or_exit(self) -> ExporterConfig {
        match ExporterConfig::from_args(self) {
            Ok(config) => config,
            Err(e) => {
                let kind = match e {
                    ConfigError::Missing { .. } => ErrorKind::MissingRequiredArgument,
                    ConfigError::Invalid { .. } => ErrorKind::ValueValidation,
                };
                Args::command().error(kind, e.to_string()).exit()
            }
        }
    }
}

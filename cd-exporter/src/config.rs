//! Validated runtime configuration.
//!
//! [`crate::cli::Args`] carries what the operator typed; [`ExporterConfig`]
//! is what the rest of the exporter runs on. Conversion fails with a
//! [`ConfigError`] before any background work starts.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;
use url::Url;

use crate::cli::Args;
use crate::domain::LifecycleState;
use crate::metrics::UpdateDiscipline;

/// Default Connect:Direct API port.
pub const DEFAULT_NODE_PORT: u16 = 1363;
/// Default exposition port.
pub const DEFAULT_HTTP_PORT: u16 = 9402;
/// Default scrape interval in seconds.
pub const DEFAULT_SCRAPE_INTERVAL_SECS: u64 = 60;
/// Default bound on every remote call, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required option --{option} (needed by the {backend} backend)")]
    Missing {
        option: &'static str,
        backend: Backend,
    },

    #[error("invalid value for --{option}: {reason}")]
    Invalid {
        option: &'static str,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(option: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            option,
            reason: reason.into(),
        }
    }
}

/// Which session collaborator collects the job listing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Backend {
    /// Connect:Direct Web Services REST API.
    #[default]
    Rest,
    /// Local `direct` command-line client.
    Cli,
}

/// Transport security between the collaborator and the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportProtocol {
    /// Plain TCP/IP.
    #[default]
    Tcpip,
    Tls12,
    Tls13,
}

impl TransportProtocol {
    /// Name the node expects in a signon request.
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Self::Tcpip => "TCPIP",
            Self::Tls12 => "TLS1.2",
            Self::Tls13 => "TLS1.3",
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

impl FromStr for TransportProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TCPIP" | "TCP" => Ok(Self::Tcpip),
            "TLS12" | "TLS1.2" => Ok(Self::Tls12),
            "TLS13" | "TLS1.3" => Ok(Self::Tls13),
            other => Err(format!(
                "unknown protocol {other:?} (expected TCPIP, TLS12 or TLS13)"
            )),
        }
    }
}

/// A string that must never show up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// The Connect:Direct node being monitored.
#[derive(Debug, Clone)]
pub struct NodeTarget {
    pub address: String,
    pub port: u16,
    pub protocol: TransportProtocol,
}

/// Settings for the Web Services backend.
#[derive(Debug, Clone)]
pub struct RestSettings {
    /// Web Services base URL, e.g. `https://cdws:9443`.
    pub server: Url,
    pub user: String,
    pub password: Secret,
    pub node: NodeTarget,
    pub accept_invalid_certs: bool,
    pub request_timeout: Duration,
}

/// Settings for the command-line backend.
#[derive(Debug, Clone)]
pub struct CliSettings {
    /// Connect:Direct installation root (contains `cdunix/`).
    pub base_path: PathBuf,
    pub timeout: Duration,
}

/// Backend-specific settings.
#[derive(Debug, Clone)]
pub enum SourceSettings {
    Rest(RestSettings),
    Cli(CliSettings),
}

impl SourceSettings {
    pub fn backend(&self) -> Backend {
        match self {
            Self::Rest(_) => Backend::Rest,
            Self::Cli(_) => Backend::Cli,
        }
    }
}

/// Fully validated exporter configuration.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub source: SourceSettings,
    pub bind_address: String,
    pub http_port: u16,
    pub scrape_interval: Duration,
    pub discipline: UpdateDiscipline,
    pub namespace: String,
    pub states: Vec<LifecycleState>,
    pub log_dir: Option<PathBuf>,
}

impl ExporterConfig {
    /// Validate parsed arguments.
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        if args.scrape_interval == 0 {
            return Err(ConfigError::invalid("scrape-interval", "must be at least 1 second"));
        }
        if args.request_timeout == 0 {
            return Err(ConfigError::invalid("request-timeout", "must be at least 1 second"));
        }
        validate_namespace(&args.namespace)?;

        let states = LifecycleState::parse_list(&args.states)
            .map_err(|e| ConfigError::invalid("states", e.to_string()))?;
        validate_metric_keys(&states)?;
        let request_timeout = Duration::from_secs(args.request_timeout);

        let source = match args.backend {
            Backend::Rest => {
                let backend = Backend::Rest;
                let server = required(args.cdws_server, "cdws-server", backend)?;
                let server = Url::parse(&server)
                    .map_err(|e| ConfigError::invalid("cdws-server", e.to_string()))?;
                if !matches!(server.scheme(), "http" | "https") {
                    return Err(ConfigError::invalid(
                        "cdws-server",
                        format!("unsupported scheme {:?}", server.scheme()),
                    ));
                }

                SourceSettings::Rest(RestSettings {
                    server,
                    user: required(args.user, "user", backend)?,
                    password: Secret::new(required(args.password, "password", backend)?),
                    node: NodeTarget {
                        address: required(args.ipaddress, "ipaddress", backend)?,
                        port: args.port,
                        protocol: args.protocol,
                    },
                    accept_invalid_certs: args.cdws_insecure,
                    request_timeout,
                })
            }
            Backend::Cli => {
                let base_path = args.base_path.ok_or(ConfigError::Missing {
                    option: "base-path",
                    backend: Backend::Cli,
                })?;
                SourceSettings::Cli(CliSettings {
                    base_path,
                    timeout: request_timeout,
                })
            }
        };

        Ok(Self {
            source,
            bind_address: args.bind_address,
            http_port: args.http_port,
            scrape_interval: Duration::from_secs(args.scrape_interval),
            discipline: args.update_mode,
            namespace: args.namespace,
            states,
            log_dir: args.log_dir,
        })
    }
}

fn required(
    value: Option<String>,
    option: &'static str,
    backend: Backend,
) -> Result<String, ConfigError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing { option, backend })
}

/// Tokens differing only in case would export the same metric name twice.
fn validate_metric_keys(states: &[LifecycleState]) -> Result<(), ConfigError> {
    for (i, state) in states.iter().enumerate() {
        let key = state.metric_key();
        if let Some(other) = states[..i].iter().find(|s| s.metric_key() == key) {
            return Err(ConfigError::invalid(
                "states",
                format!("{other} and {state} map to the same metric name"),
            ));
        }
    }
    Ok(())
}

fn validate_namespace(namespace: &str) -> Result<(), ConfigError> {
    let mut chars = namespace.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            "namespace",
            format!("{namespace:?} is not a valid metric name prefix"),
        ))
    }
}

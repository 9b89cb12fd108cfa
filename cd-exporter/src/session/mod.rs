//! Session collaborators.
//!
//! A [`JobSource`] opens whatever session it needs against the Connect:Direct
//! node, fetches the listing of in-flight processes and releases the session
//! again, on every exit path. Two backends exist:
//!
//! - [`RestApiSource`]: Connect:Direct Web Services (signon, query, signout)
//! - [`DirectCliSource`]: the local `direct` command-line client
//!
//! Both bound their remote work by the configured request timeout.

mod cli;
mod rest;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::SourceSettings;

pub use cli::DirectCliSource;
pub use rest::RestApiSource;

/// Raw result of one successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobListing {
    /// Listing text as returned by the node.
    Raw(String),
    /// The node answered but had nothing to list.
    NoData,
}

impl JobListing {
    /// Treat empty or whitespace-only output as [`JobListing::NoData`].
    pub fn from_output(output: String) -> Self {
        if output.trim().is_empty() {
            Self::NoData
        } else {
            Self::Raw(output)
        }
    }
}

/// Why a fetch failed. The scraper treats every variant the same way.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Transport-level failure (connection refused, TLS, DNS, ...).
    #[error("Connection error: {0}")]
    Connect(#[source] reqwest::Error),

    /// The remote call exceeded the request timeout.
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Signon was rejected.
    #[error("Authentication rejected (HTTP {status}): {message}")]
    Authentication { status: u16, message: String },

    /// Non-success status on an authenticated request.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The command-line client could not be started.
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The shell could not execute the client (exit code 127).
    #[error("Command not found or cannot execute binary (exit code 127), check shared libraries such as libtirpc.so.1: {stderr}")]
    CommandNotRunnable { stderr: String },

    /// The command-line client exited unsuccessfully.
    #[error("Command returned code {code:?}: {stderr}")]
    ExitStatus { code: Option<i32>, stderr: String },

    /// The node answered with something unusable.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for SessionError {
    fn from(e: reqwest::Error) -> Self {
        Self::Connect(e)
    }
}

/// Collects the in-flight job listing from a Connect:Direct node.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Human-readable target description for logs.
    fn describe(&self) -> String;

    /// Fetch the listing of all in-flight processes.
    async fn fetch_job_listing(&self) -> Result<JobListing, SessionError>;
}

/// Build the job source selected by configuration.
pub fn build_source(settings: &SourceSettings) -> crate::Result<Arc<dyn JobSource>> {
    let source: Arc<dyn JobSource> = match settings {
        SourceSettings::Rest(rest) => Arc::new(RestApiSource::new(rest.clone())?),
        SourceSettings::Cli(cli) => Arc::new(DirectCliSource::new(cli.clone())),
    };
    Ok(source)
}

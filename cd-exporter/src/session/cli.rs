//! Local `direct` command-line client backend.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{JobListing, JobSource, SessionError};
use crate::config::CliSettings;

const DIRECT_BINARY: &str = "cdunix/ndm/bin/direct";
const API_CONFIG: &str = "cdunix/ndm/cfg/cliapi/ndmapi.cfg";
const LIBRARY_DIR: &str = "cdunix/ndm/lib";

/// Select every process in the TCQ.
const SELECT_PROCESS: &[u8] = b"selpro;\n";

/// Shell convention for "command not found / cannot execute".
const EXIT_NOT_RUNNABLE: i32 = 127;

/// Runs `direct -s` under a Connect:Direct installation and returns its
/// standard output as the listing.
#[derive(Debug, Clone)]
pub struct DirectCliSource {
    settings: CliSettings,
    program: PathBuf,
}

impl DirectCliSource {
    pub fn new(settings: CliSettings) -> Self {
        let program = settings.base_path.join(DIRECT_BINARY);
        Self { settings, program }
    }

    fn command(&self) -> Command {
        let base = &self.settings.base_path;
        let mut command = Command::new(&self.program);
        command
            .arg("-s")
            .env("NDMAPICFG", base.join(API_CONFIG))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let lib_dir = base.join(LIBRARY_DIR);
        if lib_dir.is_dir() {
            command.env(
                "LD_LIBRARY_PATH",
                library_path(&lib_dir, std::env::var_os("LD_LIBRARY_PATH")),
            );
        }
        command
    }

    async fn run(&self) -> Result<Output, SessionError> {
        let mut child = self.command().spawn().map_err(|source| SessionError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            // The client may exit before reading; its exit status tells the story.
            if let Err(e) = stdin.write_all(SELECT_PROCESS).await {
                debug!(error = %e, "Failed to write command to direct");
            }
        }

        child
            .wait_with_output()
            .await
            .map_err(|source| SessionError::Spawn {
                program: self.program.display().to_string(),
                source,
            })
    }
}

#[async_trait]
impl JobSource for DirectCliSource {
    fn describe(&self) -> String {
        format!("direct CLI at {}", self.program.display())
    }

    async fn fetch_job_listing(&self) -> Result<JobListing, SessionError> {
        let output = tokio::time::timeout(self.settings.timeout, self.run())
            .await
            .map_err(|_| SessionError::Timeout(self.settings.timeout))??;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(0) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                debug!(bytes = stdout.len(), "direct returned listing");
                Ok(JobListing::from_output(stdout))
            }
            Some(EXIT_NOT_RUNNABLE) => Err(SessionError::CommandNotRunnable { stderr }),
            code => Err(SessionError::ExitStatus { code, stderr }),
        }
    }
}

/// `lib_dir` first, then whatever search path was already set.
fn library_path(lib_dir: &Path, existing: Option<OsString>) -> OsString {
    let mut paths = vec![lib_dir.to_path_buf()];
    if let Some(existing) = existing {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths).unwrap_or_else(|_| lib_dir.as_os_str().to_os_string())
}

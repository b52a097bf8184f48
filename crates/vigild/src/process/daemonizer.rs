//! Detaches `vigild` from its terminal.
//!
//! A detached daemon has no terminal to report to, so its standard streams
//! are redirected into an append-only log beside the status file. The umask
//! keeps everything the daemon creates in the state directory private.

use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

use daemonize_me::Daemon;
use thiserror::Error;
use tracing::info;

use vigil_config::StatusPaths;

use super::PROCESS_TARGET;

/// File in the state directory receiving the detached daemon's output.
pub const DAEMON_LOG_FILE: &str = "vigild.log";

const DAEMON_UMASK: u16 = 0o077;

/// Abstraction over daemonisation strategies.
pub trait Daemonizer: Send + Sync {
    /// Moves the process into the background, anchored in the state directory.
    fn daemonize(&self, paths: &StatusPaths) -> Result<(), DaemonizeError>;
}

/// Errors surfaced by the daemonisation backend.
#[derive(Debug, Error)]
pub enum DaemonizeError {
    /// The output log could not be opened before detaching.
    #[error("failed to open daemon log {path}: {source}")]
    Log {
        /// Log file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Forking or detaching failed.
    #[error("{0}")]
    System(#[from] daemonize_me::DaemonError),
}

/// Daemoniser backed by `daemonize-me`.
#[derive(Debug, Default)]
pub struct SystemDaemonizer;

impl SystemDaemonizer {
    /// Builds a new system daemoniser.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Daemonizer for SystemDaemonizer {
    fn daemonize(&self, paths: &StatusPaths) -> Result<(), DaemonizeError> {
        let log_path = paths.state_dir().join(DAEMON_LOG_FILE);
        let stdout = open_daemon_log(&log_path)?;
        let stderr = stdout.try_clone().map_err(|source| DaemonizeError::Log {
            path: log_path.clone(),
            source,
        })?;
        info!(
            target: PROCESS_TARGET,
            log = %log_path.display(),
            status_file = %paths.status_path().display(),
            "detaching; further output goes to the daemon log"
        );
        Daemon::new()
            .umask(DAEMON_UMASK)
            .work_dir(paths.state_dir())
            .stdout(stdout)
            .stderr(stderr)
            .name(OsStr::new(env!("CARGO_PKG_NAME")))
            .start()?;
        info!(target: PROCESS_TARGET, pid = std::process::id(), "daemon detached");
        Ok(())
    }
}

/// Opens the daemon log for appending, creating it owner-only.
fn open_daemon_log(path: &Path) -> Result<File, DaemonizeError> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path).map_err(|source| DaemonizeError::Log {
        path: path.to_path_buf(),
        source,
    })
}

//! Waiting for a graceful shutdown request.

use std::io;

use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::info;

use vigil_status::ExitReason;

use super::PROCESS_TARGET;

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until shutdown should proceed, returning why.
    fn wait(&self) -> Result<ExitReason, ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The signal iterator closed without delivering a signal.
    #[error("signal listener closed before a shutdown request arrived")]
    Closed,
}

/// Shutdown listener that waits for termination signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShutdownSignal;

impl SystemShutdownSignal {
    /// Builds a signal listener.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<ExitReason, ShutdownError> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT])
            .map_err(|source| ShutdownError::Install { source })?;
        let signal = signals.forever().next().ok_or(ShutdownError::Closed)?;
        let reason = ExitReason::from_signal(signal).unwrap_or(ExitReason::SIGNAL_TERM);
        info!(
            target: PROCESS_TARGET,
            signal,
            %reason,
            "shutdown signal received"
        );
        Ok(reason)
    }
}

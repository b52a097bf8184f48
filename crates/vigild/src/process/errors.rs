//! Defines the unified error surface for daemon launch and supervision.

use std::sync::Arc;

use ortho_config::OrthoError;
use thiserror::Error;

use vigil_config::StatusPathsError;

use crate::crash::CrashHandlerError;
use crate::telemetry::TelemetryError;

use super::daemonizer::DaemonizeError;
use super::shutdown::ShutdownError;

/// Errors surfaced while launching or supervising the daemon process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Config {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry could not be installed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The state directory could not be prepared.
    #[error("failed to prepare state directory: {source}")]
    StatePaths {
        /// Underlying filesystem error.
        #[source]
        source: StatusPathsError,
    },
    /// Daemonisation failed.
    #[error("failed to daemonise: {source}")]
    Daemonize {
        /// Underlying daemonisation error.
        #[source]
        source: DaemonizeError,
    },
    /// Fault handlers could not be installed.
    #[error("failed to install crash handlers: {source}")]
    CrashHandlers {
        /// Underlying installation error.
        #[source]
        source: CrashHandlerError,
    },
    /// Waiting for shutdown failed.
    #[error("failed to await shutdown signal: {source}")]
    Shutdown {
        /// Underlying shutdown error.
        #[source]
        source: ShutdownError,
    },
}

impl From<Arc<OrthoError>> for LaunchError {
    fn from(source: Arc<OrthoError>) -> Self {
        Self::Config { source }
    }
}

impl From<TelemetryError> for LaunchError {
    fn from(source: TelemetryError) -> Self {
        Self::Telemetry { source }
    }
}

impl From<StatusPathsError> for LaunchError {
    fn from(source: StatusPathsError) -> Self {
        Self::StatePaths { source }
    }
}

impl From<DaemonizeError> for LaunchError {
    fn from(source: DaemonizeError) -> Self {
        Self::Daemonize { source }
    }
}

impl From<CrashHandlerError> for LaunchError {
    fn from(source: CrashHandlerError) -> Self {
        Self::CrashHandlers { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}

//! Structured logging for `vigild`.
//!
//! Events go to stderr. A background daemon's stderr ends up in the daemon
//! log after detaching, so colour is only used for a foreground run on a
//! terminal. Thread names and ids are included because crash reports in the
//! status file name the faulting thread the same way.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use vigil_config::{Config, LogFormat};

use crate::process::LaunchMode;

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Marker that the global subscriber is in place.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured log filter expression did not parse.
    #[error("invalid log filter '{filter}': {message}")]
    Filter {
        /// Filter expression from the configuration.
        filter: String,
        /// Parser diagnostic.
        message: String,
    },
    /// Another subscriber was already installed.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global subscriber for a run in `mode`.
///
/// Only the first call installs anything; tests launch the daemon many
/// times per process.
pub(crate) fn initialise(
    config: &Config,
    mode: LaunchMode,
) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config, mode))
        .map(|_| TelemetryHandle)
}

fn install_subscriber(config: &Config, mode: LaunchMode) -> Result<(), TelemetryError> {
    let filter = log_filter(config)?;
    let ansi = use_colour(mode, io::stderr().is_terminal());
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_writer(io::stderr)
        .with_ansi(ansi)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

fn log_filter(config: &Config) -> Result<EnvFilter, TelemetryError> {
    let directives = config.log_filter();
    EnvFilter::try_new(directives).map_err(|error| TelemetryError::Filter {
        filter: directives.to_owned(),
        message: error.to_string(),
    })
}

const fn use_colour(mode: LaunchMode, stderr_is_terminal: bool) -> bool {
    matches!(mode, LaunchMode::Foreground) && stderr_is_terminal
}

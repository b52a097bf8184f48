//! Daemon process supervision: daemonisation, lifecycle and shutdown.

pub(crate) mod daemonizer;
mod errors;
pub(crate) mod launch;
pub(crate) mod shutdown;

pub use daemonizer::{DAEMON_LOG_FILE, DaemonizeError, Daemonizer, SystemDaemonizer};
pub use errors::LaunchError;
pub use launch::{LaunchMode, run_daemon};
pub use shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
pub(crate) const FOREGROUND_ENV_VAR: &str = "VIGIL_FOREGROUND";

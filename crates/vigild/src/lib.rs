//! The `vigild` monitoring daemon.
//!
//! The daemon is a thin shell around [`vigil_status`]: it loads layered
//! configuration through [`vigil_config`], installs structured telemetry,
//! gathers host facts, and then walks a [`StatusTracker`] through its
//! lifecycle so the next start can tell whether this run ended cleanly.
//!
//! Deadly signals (`SIGSEGV`, `SIGBUS`, `SIGILL`, `SIGFPE`, `SIGABRT`) are
//! routed to the status crate's signal-safe capture path, and panics register
//! their location, message and backtrace before the process dies.
//!
//! [`StatusTracker`]: vigil_status::StatusTracker

mod crash;
mod host;
mod loader;
mod process;
mod telemetry;

pub use crash::{CrashHandlerError, FaultHooks, SystemFaultHooks};
pub use host::{HostProbe, SystemHostProbe};
pub use loader::{ConfigLoader, StaticConfigLoader, SystemConfigLoader};
pub use process::{
    DAEMON_LOG_FILE, DaemonizeError, Daemonizer, LaunchError, LaunchMode, ShutdownError,
    ShutdownSignal, SystemDaemonizer, SystemShutdownSignal, run_daemon,
};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;

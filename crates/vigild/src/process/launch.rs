//! Supervises daemon launch sequencing and lifecycle tracking.

use std::env;
use std::sync::Arc;

use tracing::info;

use vigil_config::StatusPaths;
use vigil_status::{CrashVerdict, DaemonStatus, StatusStore, StatusTracker};

use crate::crash::{FaultHooks, SystemFaultHooks};
use crate::host::{HostProbe, SystemHostProbe};
use crate::loader::{ConfigLoader, SystemConfigLoader};
use crate::telemetry;

use super::daemonizer::{Daemonizer, SystemDaemonizer};
use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};
use super::{FOREGROUND_ENV_VAR, PROCESS_TARGET};

/// Launch mode for the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Fork into the background and detach from the controlling terminal.
    Background,
    /// Remain attached to the terminal; primarily used for debugging and tests.
    Foreground,
}

impl LaunchMode {
    fn detect() -> Self {
        if env::var_os(FOREGROUND_ENV_VAR).is_some() {
            Self::Foreground
        } else {
            Self::Background
        }
    }
}

/// Process-level collaborators needed to control daemon lifecycle.
pub(crate) struct ProcessControl<D, S, F> {
    pub(crate) mode: LaunchMode,
    pub(crate) daemonizer: D,
    pub(crate) shutdown: S,
    pub(crate) faults: F,
}

/// Service dependencies required to describe this run.
pub(crate) struct ServiceDeps<L, H> {
    pub(crate) loader: L,
    pub(crate) host: H,
}

/// Collaborators required to launch the daemon runtime.
pub(crate) struct LaunchPlan<L, H, D, S, F> {
    pub(crate) process: ProcessControl<D, S, F>,
    pub(crate) services: ServiceDeps<L, H>,
}

/// Runs the daemon using the production collaborators.
pub fn run_daemon() -> Result<(), LaunchError> {
    let plan = LaunchPlan {
        process: ProcessControl {
            mode: LaunchMode::detect(),
            daemonizer: SystemDaemonizer::new(),
            shutdown: SystemShutdownSignal::new(),
            faults: SystemFaultHooks,
        },
        services: ServiceDeps {
            loader: SystemConfigLoader,
            host: SystemHostProbe,
        },
    };
    run_daemon_with(plan).map(|_| ())
}

/// Runs the daemon with injected collaborators.
///
/// Returns the classification of the previous run once this run has shut
/// down cleanly.
pub(crate) fn run_daemon_with<L, H, D, S, F>(
    plan: LaunchPlan<L, H, D, S, F>,
) -> Result<CrashVerdict, LaunchError>
where
    L: ConfigLoader,
    H: HostProbe,
    D: Daemonizer,
    S: ShutdownSignal,
    F: FaultHooks,
{
    let LaunchPlan { process, services } = plan;
    let ProcessControl {
        mode,
        daemonizer,
        shutdown,
        faults,
    } = process;
    let ServiceDeps { loader, host } = services;

    let config = loader.load()?;
    telemetry::initialise(&config, mode)?;
    info!(
        target: PROCESS_TARGET,
        ?mode,
        profile = %config.profile(),
        "starting daemon runtime"
    );
    let paths = StatusPaths::from_config(&config)?;
    if matches!(mode, LaunchMode::Background) {
        daemonizer.daemonize(&paths)?;
    }

    let facts = host.session_facts(&config, &paths);
    let tracker = Arc::new(StatusTracker::start(StatusStore::new(paths.clone()), facts));
    let verdict = tracker.check_crash();

    tracker.update_status(DaemonStatus::Initializing);
    tracker.startup_step("install crash handlers");
    faults.install(&tracker)?;
    tracker.startup_step("sample resources");
    let (memory, disk_space) = host.resources(&paths);
    tracker.refresh_resources(memory, disk_space);
    tracker.startup_step("ready");
    tracker.update_status(DaemonStatus::Running);
    info!(
        target: PROCESS_TARGET,
        previous_run = verdict.label(),
        status_file = %paths.status_path().display(),
        "daemon running"
    );

    let reason = shutdown.wait()?;
    tracker.exit_reason_save(reason);
    tracker.update_status(DaemonStatus::Exiting);
    tracker.shutdown_step("sample resources");
    let (memory, disk_space) = host.resources(&paths);
    tracker.refresh_resources(memory, disk_space);
    tracker.shutdown_step("complete");
    tracker.update_status(DaemonStatus::Exited);
    info!(
        target: PROCESS_TARGET,
        %reason,
        "shutdown sequence completed"
    );
    Ok(verdict)
}

//! Test collaborators standing in for the operating system.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use camino::Utf8PathBuf;
use ortho_config::OrthoError;
use tempfile::TempDir;
use uuid::Uuid;

use vigil_config::{Config, StatusPaths};
use vigil_status::{
    DiskSnapshot, ExitReason, MemorySnapshot, SessionFacts, StatusStore, StatusTracker,
};

use crate::crash::{CrashHandlerError, FaultHooks};
use crate::host::HostProbe;
use crate::loader::ConfigLoader;
use crate::process::{DaemonizeError, Daemonizer, ShutdownError, ShutdownSignal};

/// Serves a configuration rooted in a private temporary state directory.
#[derive(Clone)]
pub(crate) struct TestConfigLoader {
    _dir: Arc<TempDir>,
    config: Config,
}

impl TestConfigLoader {
    pub(crate) fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let state_dir =
            Utf8PathBuf::from_path_buf(dir.path().join("state")).expect("utf-8 temp dir");
        Self {
            _dir: Arc::new(dir),
            config: Config {
                state_dir,
                log_filter: "warn".into(),
                ..Config::default()
            },
        }
    }

    pub(crate) fn store(&self) -> StatusStore {
        StatusStore::new(StatusPaths::from_config(&self.config).expect("status paths"))
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Counts daemonisation requests without forking.
#[derive(Clone, Default)]
pub(crate) struct TestDaemonizer {
    calls: Arc<AtomicUsize>,
}

impl TestDaemonizer {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Daemonizer for TestDaemonizer {
    fn daemonize(&self, _paths: &StatusPaths) -> Result<(), DaemonizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Delivers a shutdown request as soon as the daemon waits for one.
#[derive(Clone, Copy)]
pub(crate) struct ImmediateShutdown(pub(crate) ExitReason);

impl ShutdownSignal for ImmediateShutdown {
    fn wait(&self) -> Result<ExitReason, ShutdownError> {
        Ok(self.0)
    }
}

/// Reports fixed host facts for a chosen boot session.
#[derive(Clone, Copy)]
pub(crate) struct TestHostProbe {
    pub(crate) boot_id: Uuid,
}

impl HostProbe for TestHostProbe {
    fn session_facts(&self, config: &Config, _paths: &StatusPaths) -> SessionFacts {
        SessionFacts {
            version: "0.0.0-test".into(),
            profile: config.profile(),
            boot_id: self.boot_id,
            ..SessionFacts::default()
        }
    }

    fn resources(&self, _paths: &StatusPaths) -> (MemorySnapshot, DiskSnapshot) {
        let memory = MemorySnapshot {
            ram_total_bytes: 8 << 30,
            ram_available_bytes: 4 << 30,
            ..MemorySnapshot::default()
        };
        (memory, DiskSnapshot::default())
    }
}

/// Records installation requests instead of touching process-wide handlers.
#[derive(Clone, Default)]
pub(crate) struct RecordingFaultHooks {
    installs: Arc<AtomicUsize>,
}

impl RecordingFaultHooks {
    pub(crate) fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }
}

impl FaultHooks for RecordingFaultHooks {
    fn install(&self, _tracker: &Arc<StatusTracker>) -> Result<(), CrashHandlerError> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

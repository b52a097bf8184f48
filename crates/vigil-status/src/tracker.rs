//! The lifecycle tracker: owner of the current invocation's record.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use tracing::{debug, info, warn};
use uuid::Uuid;

use vigil_config::Profile;

use crate::clock::{thread_tag, unix_micros, unix_secs};
use crate::dedup::{DedupRing, DedupVerdict, Fingerprint};
use crate::detector::CrashVerdict;
use crate::error::StatusError;
use crate::fatal::FatalCapture;
use crate::record::{
    DaemonStatus, DiskSnapshot, Environment, ExitReason, FatalRecord, MemorySnapshot, OsType,
    StatusRecord,
};
use crate::store::StatusStore;

const TRACKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::tracker");

/// Facts about this invocation gathered by the host before startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFacts {
    /// Build or release identifier.
    pub version: String,
    /// Configuration profile.
    pub profile: Profile,
    /// Operating system family.
    pub os_type: OsType,
    /// Identifier of the current host boot session; nil when unknown.
    pub boot_id: Uuid,
    /// Host boot time in seconds since the epoch.
    pub boottime: u64,
    /// Stable host identifier; carried from the prior record when absent.
    pub host_id: Option<Uuid>,
    /// Fleet node identifier; carried from the prior record when absent.
    pub node_id: Option<Uuid>,
    /// Fleet claim identifier; carried from the prior record when absent.
    pub claim_id: Option<Uuid>,
    /// Host and installation facts.
    pub environment: Environment,
    /// Memory snapshot.
    pub memory: MemorySnapshot,
    /// Disk snapshot for the state directory.
    pub disk_space: DiskSnapshot,
}

/// Tracks the daemon lifecycle and persists every transition.
///
/// The prior record is loaded and classified once, at [`StatusTracker::start`].
/// All mutations go through an internal mutex and are mirrored into the
/// [`FatalCapture`] so a signal handler always sees current state.
#[derive(Debug)]
pub struct StatusTracker {
    store: StatusStore,
    prior: StatusRecord,
    verdict: CrashVerdict,
    reported: AtomicBool,
    current: Mutex<StatusRecord>,
    fatal: &'static FatalCapture,
    started_secs: u64,
}

impl StatusTracker {
    /// Loads and classifies the prior record and begins a fresh one.
    ///
    /// Nothing is written until the first transition. Each call allocates a
    /// [`FatalCapture`] that lives until the process exits, so start one
    /// tracker per process.
    #[must_use]
    pub fn start(store: StatusStore, facts: SessionFacts) -> Self {
        let prior = store.load();
        let verdict = CrashVerdict::classify(&prior, facts.boot_id);
        let started_secs = unix_secs();
        let current = fresh_record(&prior, facts);
        debug!(
            target: TRACKER_TARGET,
            invocation = %current.invocation,
            restarts = current.restarts,
            verdict = verdict.label(),
            "status tracking started"
        );
        let fatal: &'static FatalCapture = Box::leak(Box::new(FatalCapture::new(
            store.status_path(),
            &current,
            started_secs,
        )));
        Self {
            store,
            prior,
            verdict,
            reported: AtomicBool::new(false),
            current: Mutex::new(current),
            fatal,
            started_secs,
        }
    }

    /// Advances the lifecycle state and persists the record.
    ///
    /// Backwards requests are ignored; a request for the current state only
    /// refreshes the timestamps.
    pub fn update_status(&self, status: DaemonStatus) {
        let mut current = self.lock();
        let previous = current.status;
        if status < previous {
            warn!(
                target: TRACKER_TARGET,
                from = %previous,
                to = %status,
                "ignoring backwards status transition"
            );
            return;
        }
        let now = unix_secs();
        if previous < DaemonStatus::Initializing && status >= DaemonStatus::Initializing {
            current.timings.init = now;
            if previous == DaemonStatus::None {
                current.restarts = current.restarts.saturating_add(1);
            }
        }
        if previous < DaemonStatus::Exiting && status >= DaemonStatus::Exiting {
            current.timings.exit = now;
        }
        current.status = status;
        if previous != status {
            info!(
                target: TRACKER_TARGET,
                from = %previous,
                to = %status,
                "daemon status changed"
            );
        }
        self.commit(&mut current);
    }

    /// Records the last startup checkpoint reached.
    pub fn startup_step(&self, step: &str) {
        let mut current = self.lock();
        current.steps.startup.set(step);
        debug!(target: TRACKER_TARGET, step, "startup step");
        self.commit(&mut current);
    }

    /// Records the last shutdown checkpoint reached.
    pub fn shutdown_step(&self, step: &str) {
        let mut current = self.lock();
        current.steps.shutdown.set(step);
        debug!(target: TRACKER_TARGET, step, "shutdown step");
        self.commit(&mut current);
    }

    /// Adds `reason` to the recorded exit reasons and persists the record.
    pub fn exit_reason_save(&self, reason: ExitReason) {
        let mut current = self.lock();
        current.exit_reason |= reason;
        debug!(
            target: TRACKER_TARGET,
            exit_reason = %current.exit_reason,
            "exit reason recorded"
        );
        self.commit(&mut current);
    }

    /// Like [`StatusTracker::exit_reason_save`], but gives up instead of
    /// waiting when the record is locked.
    ///
    /// Returns `false` when nothing was recorded. Fatal paths fall back to
    /// [`FatalCapture::capture`] in that case.
    pub fn try_exit_reason_save(&self, reason: ExitReason) -> bool {
        let Some(mut current) = self.try_lock() else {
            return false;
        };
        current.exit_reason |= reason;
        self.commit(&mut current);
        true
    }

    /// Stores fault detail for the capture that will follow.
    ///
    /// Called from panic hooks and fatal error paths, so it never waits on
    /// the record lock. When the lock is free the detail is mirrored but not
    /// written; the subsequent capture or exit-reason save writes it. When
    /// the lock is held, possibly by the faulting thread itself, the detail
    /// is staged in the [`FatalCapture`] and the verdict comes from the last
    /// published history.
    pub fn register_fatal(
        &self,
        filename: &str,
        function: &str,
        message: &str,
        errno: &str,
        stack_trace: &str,
        line: u32,
    ) -> DedupVerdict {
        let fingerprint = Fingerprint::of(filename, function, line, message);
        let mut detail = FatalRecord {
            line,
            thread: thread_tag(),
            fingerprint: fingerprint.value(),
            ..FatalRecord::default()
        };
        detail.filename.set(filename);
        detail.function.set(function);
        detail.message.set(message);
        detail.errno.set(errno);
        detail.stack_trace.set(stack_trace);

        let Some(mut current) = self.try_lock() else {
            self.fatal.stage(&detail);
            return if self.fatal.has_seen(fingerprint) {
                DedupVerdict::Duplicate
            } else {
                DedupVerdict::New
            };
        };
        let verdict = current.dedup.observe(fingerprint, unix_micros());
        detail.duplicate = verdict.is_duplicate();
        current.fatal = detail;
        self.stamp(&mut current);
        self.fatal.publish(&current);
        verdict
    }

    /// Replaces the memory and disk snapshots.
    pub fn refresh_resources(&self, memory: MemorySnapshot, disk_space: DiskSnapshot) {
        let mut current = self.lock();
        current.memory = memory;
        current.disk_space = disk_space;
        self.commit(&mut current);
    }

    /// Classification of the previous run.
    ///
    /// The first call logs a summary of the prior run.
    pub fn check_crash(&self) -> CrashVerdict {
        if !self.reported.swap(true, Ordering::AcqRel) {
            self.report();
        }
        self.verdict
    }

    /// Returns `true` when the previous run crashed during this boot.
    #[must_use]
    pub fn has_last_crashed(&self) -> bool {
        self.verdict.is_crash()
    }

    /// Returns `true` when the previous run was cut off mid-shutdown.
    #[must_use]
    pub fn was_incomplete_shutdown(&self) -> bool {
        self.verdict.is_incomplete_shutdown()
    }

    /// The record left by the previous run.
    #[must_use]
    pub fn prior(&self) -> &StatusRecord {
        &self.prior
    }

    /// A copy of the current record.
    #[must_use]
    pub fn snapshot(&self) -> StatusRecord {
        self.lock().clone()
    }

    /// Capture handle to install for signal handlers.
    #[must_use]
    pub fn fatal_capture(&self) -> &'static FatalCapture {
        self.fatal
    }

    /// Store backing this tracker.
    #[must_use]
    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    fn lock(&self) -> MutexGuard<'_, StatusRecord> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_lock(&self) -> Option<MutexGuard<'_, StatusRecord>> {
        match self.current.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    fn stamp(&self, record: &mut StatusRecord) {
        record.timestamp = unix_micros();
        record.uptime = unix_secs().saturating_sub(self.started_secs);
    }

    fn commit(&self, record: &mut StatusRecord) {
        self.adopt_staged(record);
        self.stamp(record);
        if !self.fatal.publish(record) {
            debug!(
                target: TRACKER_TARGET,
                "status write abandoned, fatal capture in progress"
            );
            return;
        }
        match self.store.save_unless(record, || self.fatal.is_capturing()) {
            Ok(()) => {}
            Err(StatusError::Abandoned) => debug!(
                target: TRACKER_TARGET,
                "status write discarded, fatal capture took over"
            ),
            Err(error) => warn!(
                target: TRACKER_TARGET,
                path = %self.store.status_path().display(),
                %error,
                "failed to persist daemon status"
            ),
        }
    }

    /// Moves detail staged while the lock was busy into the record.
    fn adopt_staged(&self, record: &mut StatusRecord) {
        if !record.fatal.is_empty() {
            return;
        }
        let Some(mut detail) = self.fatal.staged() else {
            return;
        };
        let fingerprint = Fingerprint::of(
            detail.filename.as_str(),
            detail.function.as_str(),
            detail.line,
            detail.message.as_str(),
        );
        detail.fingerprint = fingerprint.value();
        detail.duplicate = record.dedup.observe(fingerprint, unix_micros()).is_duplicate();
        record.fatal = detail;
    }

    fn report(&self) {
        let prior = &self.prior;
        let fatal_location = format!("{}:{}", prior.fatal.filename, prior.fatal.line);
        match self.verdict {
            CrashVerdict::Crashed {
                exit_reason,
                fatal_recorded,
                duplicate,
                ..
            } => warn!(
                target: TRACKER_TARGET,
                verdict = self.verdict.label(),
                %exit_reason,
                fatal_recorded,
                duplicate,
                fatal_message = %prior.fatal.message,
                %fatal_location,
                last_startup_step = %prior.steps.startup,
                prior_invocation = %prior.invocation,
                "previous run crashed"
            ),
            CrashVerdict::IncompleteShutdown { exit_reason } => warn!(
                target: TRACKER_TARGET,
                verdict = self.verdict.label(),
                %exit_reason,
                last_shutdown_step = %prior.steps.shutdown,
                prior_invocation = %prior.invocation,
                "previous run did not finish shutting down"
            ),
            verdict => info!(
                target: TRACKER_TARGET,
                verdict = verdict.label(),
                prior_status = %prior.status,
                prior_exit_reason = %prior.exit_reason,
                "previous run classified"
            ),
        }
    }
}

fn fresh_record(prior: &StatusRecord, facts: SessionFacts) -> StatusRecord {
    let same_boot = prior.status != DaemonStatus::None && prior.boot_id == facts.boot_id;
    let carried = |supplied: Option<Uuid>, previous: Uuid| {
        supplied
            .or_else(|| (!previous.is_nil()).then_some(previous))
            .unwrap_or_default()
    };
    let mut record = StatusRecord {
        status: DaemonStatus::None,
        profile: facts.profile,
        os_type: facts.os_type,
        boottime: facts.boottime,
        restarts: if same_boot { prior.restarts } else { 0 },
        boot_id: facts.boot_id,
        invocation: Uuid::new_v4(),
        host_id: facts
            .host_id
            .or_else(|| (!prior.host_id.is_nil()).then_some(prior.host_id))
            .unwrap_or_else(Uuid::new_v4),
        node_id: carried(facts.node_id, prior.node_id),
        claim_id: carried(facts.claim_id, prior.claim_id),
        environment: facts.environment,
        memory: facts.memory,
        disk_space: facts.disk_space,
        dedup: if same_boot {
            prior.dedup
        } else {
            DedupRing::new()
        },
        timestamp: unix_micros(),
        ..StatusRecord::default()
    };
    record.version.set(&facts.version);
    record
}

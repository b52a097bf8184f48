//! Capture of fatal events from a signal handler.
//!
//! The tracker mirrors every change into a [`FatalCapture`]. When a deadly
//! signal arrives, [`deadly_signal_received`] claims the capture, copies the
//! latest mirror into preallocated scratch space, fills in the fault detail
//! and writes the status file with raw system calls. No allocation, locking
//! or logging happens on that path.

use std::cell::UnsafeCell;
use std::fmt;
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, AtomicU64, AtomicUsize, Ordering};

use crate::clock::{thread_tag, unix_micros, unix_secs};
use crate::dedup::{DEDUP_CAPACITY, Fingerprint};
use crate::raw::{ENCODE_CAPACITY, RawPersister, encode_into};
use crate::record::{ExitReason, FatalRecord, StatusRecord};

static INSTALLED: AtomicPtr<FatalCapture> = AtomicPtr::new(ptr::null_mut());

const STAGE_EMPTY: u8 = 0;
const STAGE_WRITING: u8 = 1;
const STAGE_READY: u8 = 2;

/// Result of a capture attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// This call won the claim and recorded the fatal event.
    Captured {
        /// The fault fingerprint had been seen before.
        duplicate: bool,
        /// The status file was written.
        persisted: bool,
    },
    /// Another capture already owns the record; nothing was written.
    Dropped,
    /// No capture has been installed for this process.
    NotInstalled,
}

struct Scratch {
    record: StatusRecord,
    buffer: Box<[u8]>,
}

/// Lock-free handoff between the lifecycle tracker and a signal handler.
///
/// A capture owns roughly 64 KiB of scratch plus four record copies and is
/// meant to live for the whole process: the tracker leaks one per
/// [`StatusTracker::start`](crate::StatusTracker::start).
pub struct FatalCapture {
    mirrors: [UnsafeCell<StatusRecord>; 2],
    active: AtomicUsize,
    seen: [AtomicU64; DEDUP_CAPACITY],
    staged: UnsafeCell<FatalRecord>,
    stage: AtomicU8,
    claimed: AtomicBool,
    written: AtomicBool,
    started_secs: u64,
    scratch: UnsafeCell<Scratch>,
    persister: RawPersister,
}

// SAFETY: mirrors are written only by `publish`, which the tracker serialises,
// and only into the slot that is not active. The staged detail is written only
// by the caller that moves `stage` out of empty, and read only once it is
// ready. The scratch is touched only by the single caller that wins
// `claimed`, and read back only after `written` is set.
unsafe impl Sync for FatalCapture {}

impl FatalCapture {
    /// Preallocates everything the capture path needs.
    #[must_use]
    pub fn new(status_path: &Path, initial: &StatusRecord, started_secs: u64) -> Self {
        Self {
            mirrors: [
                UnsafeCell::new(initial.clone()),
                UnsafeCell::new(initial.clone()),
            ],
            active: AtomicUsize::new(0),
            seen: seen_hashes(initial),
            staged: UnsafeCell::new(FatalRecord::default()),
            stage: AtomicU8::new(STAGE_EMPTY),
            claimed: AtomicBool::new(false),
            written: AtomicBool::new(false),
            started_secs,
            scratch: UnsafeCell::new(Scratch {
                record: initial.clone(),
                buffer: vec![0_u8; ENCODE_CAPACITY].into_boxed_slice(),
            }),
            persister: RawPersister::new(status_path),
        }
    }

    /// Makes this capture the target of [`deadly_signal_received`].
    pub fn install(&'static self) {
        INSTALLED.store(ptr::from_ref(self).cast_mut(), Ordering::Release);
    }

    /// Returns `true` once a capture has claimed the record.
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }

    /// The record written by the capture, once it has finished.
    #[must_use]
    pub fn captured(&self) -> Option<StatusRecord> {
        if !self.written.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: the winner no longer touches the scratch after `written`.
        Some(unsafe { (*self.scratch.get()).record.clone() })
    }

    /// Mirrors `record` so a later capture starts from it.
    ///
    /// Returns `false` without writing when a capture has claimed the record.
    pub(crate) fn publish(&self, record: &StatusRecord) -> bool {
        if self.is_capturing() {
            return false;
        }
        let next = self.active.load(Ordering::Acquire) ^ 1;
        // SAFETY: callers hold the tracker lock, and a capture reads only the
        // active slot.
        unsafe { (*self.mirror(next)).clone_from(record) };
        self.active.store(next, Ordering::Release);
        let mut hashes = record.dedup.iter().map(|entry| entry.hash);
        for slot in &self.seen {
            slot.store(hashes.next().unwrap_or(0), Ordering::Release);
        }
        true
    }

    /// Returns `true` when `fingerprint` is in the last published history.
    ///
    /// Reads only atomics, so it never waits on the tracker.
    pub(crate) fn has_seen(&self, fingerprint: Fingerprint) -> bool {
        self.seen
            .iter()
            .any(|slot| slot.load(Ordering::Acquire) == fingerprint.value())
    }

    /// Parks fault detail for the next capture without touching the mirrors.
    ///
    /// Used when the tracker record is locked. Only the first detail is kept;
    /// later calls return `false`. The capture fingerprints staged detail
    /// itself, so `detail.fingerprint` is ignored.
    pub(crate) fn stage(&self, detail: &FatalRecord) -> bool {
        if self
            .stage
            .compare_exchange(
                STAGE_EMPTY,
                STAGE_WRITING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }
        // SAFETY: leaving the empty state grants exclusive write access.
        let staged = unsafe { &mut *self.staged.get() };
        *staged = *detail;
        staged.fingerprint = 0;
        staged.duplicate = false;
        self.stage.store(STAGE_READY, Ordering::Release);
        true
    }

    /// The staged fault detail, once fully written.
    pub(crate) fn staged(&self) -> Option<FatalRecord> {
        if self.stage.load(Ordering::Acquire) != STAGE_READY {
            return None;
        }
        // SAFETY: a ready stage is never written again.
        Some(unsafe { *self.staged.get() })
    }

    /// Records a fatal event caused by `reason`.
    ///
    /// Async-signal-safe. Exactly one call per capture wins; every other call
    /// returns [`CaptureOutcome::Dropped`].
    pub fn capture(&self, reason: ExitReason) -> CaptureOutcome {
        if self
            .claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return CaptureOutcome::Dropped;
        }

        // SAFETY: winning the claim grants exclusive use of the scratch.
        let Scratch { record, buffer } = unsafe { &mut *self.scratch.get() };
        let active = self.active.load(Ordering::Acquire);
        // SAFETY: publishers stop at the claim and never write the active slot.
        record.clone_from(unsafe { &*self.mirror(active) });

        let now = unix_micros();
        record.exit_reason |= reason;
        record.timestamp = now;
        record.uptime = unix_secs().saturating_sub(self.started_secs);

        if record.fatal.is_empty() {
            record.fatal = self.staged().unwrap_or(record.fatal);
        }
        let fatal = &mut record.fatal;
        if fatal.is_empty() {
            fatal.message.set(reason.primary_name());
            fatal.thread = thread_tag();
        }
        if fatal.fingerprint == 0 {
            let fingerprint = Fingerprint::of(
                fatal.filename.as_str(),
                fatal.function.as_str(),
                fatal.line,
                fatal.message.as_str(),
            );
            fatal.fingerprint = fingerprint.value();
            fatal.duplicate = record.dedup.observe(fingerprint, now).is_duplicate();
        }

        let duplicate = record.fatal.duplicate;
        let persisted =
            encode_into(record, buffer).is_some_and(|encoded| self.persister.write(encoded));
        self.written.store(true, Ordering::Release);
        CaptureOutcome::Captured {
            duplicate,
            persisted,
        }
    }

    fn mirror(&self, index: usize) -> *mut StatusRecord {
        let [first, second] = &self.mirrors;
        if index & 1 == 0 {
            first.get()
        } else {
            second.get()
        }
    }
}

fn seen_hashes(record: &StatusRecord) -> [AtomicU64; DEDUP_CAPACITY] {
    let mut hashes = record.dedup.iter().map(|entry| entry.hash);
    std::array::from_fn(|_| AtomicU64::new(hashes.next().unwrap_or(0)))
}

impl fmt::Debug for FatalCapture {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FatalCapture")
            .field("claimed", &self.claimed.load(Ordering::Relaxed))
            .field("written", &self.written.load(Ordering::Relaxed))
            .field("persister", &self.persister)
            .finish_non_exhaustive()
    }
}

/// Signal-handler entry point: captures into the installed [`FatalCapture`].
///
/// Async-signal-safe. Restoring the default disposition and re-raising the
/// signal is left to the caller.
pub fn deadly_signal_received(reason: ExitReason) -> CaptureOutcome {
    let installed = INSTALLED.load(Ordering::Acquire);
    // SAFETY: only `'static` captures are ever stored.
    match unsafe { installed.as_ref() } {
        Some(capture) => capture.capture(reason),
        None => CaptureOutcome::NotInstalled,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;
    use crate::record::DaemonStatus;

    struct Harness {
        dir: TempDir,
        capture: FatalCapture,
    }

    impl Harness {
        fn status_path(&self) -> std::path::PathBuf {
            self.dir.path().join("vigild-status.json")
        }

        fn on_disk(&self) -> StatusRecord {
            let contents = std::fs::read(self.status_path()).expect("read status file");
            serde_json::from_slice(&contents).expect("parse status file")
        }
    }

    #[fixture]
    fn harness() -> Harness {
        let dir = TempDir::new().expect("temp dir");
        let mut initial = StatusRecord::default();
        initial.status = DaemonStatus::Running;
        let capture = FatalCapture::new(&dir.path().join("vigild-status.json"), &initial, 0);
        Harness { dir, capture }
    }

    #[rstest]
    fn capture_writes_frozen_status(harness: Harness) {
        let outcome = harness.capture.capture(ExitReason::SIGNAL_SEGV);
        assert_eq!(
            outcome,
            CaptureOutcome::Captured {
                duplicate: false,
                persisted: true
            }
        );
        let record = harness.on_disk();
        assert_eq!(record.status, DaemonStatus::Running);
        assert_eq!(record.exit_reason, ExitReason::SIGNAL_SEGV);
        assert_eq!(record.fatal.message.as_str(), "signal-segv");
        assert!(!record.fatal.thread.is_empty());
        assert_ne!(record.fatal.fingerprint, 0);
        assert_eq!(record.dedup.len(), 1);
    }

    #[rstest]
    fn registered_detail_is_kept(harness: Harness) {
        let mut record = StatusRecord::default();
        record.status = DaemonStatus::Exiting;
        record.exit_reason = ExitReason::SIGNAL_TERM;
        record.fatal.filename.set("src/main.rs");
        record.fatal.message.set("index out of bounds");
        record.fatal.line = 42;
        record.fatal.fingerprint = 7;
        assert!(harness.capture.publish(&record));

        harness.capture.capture(ExitReason::SIGNAL_ABRT);
        let written = harness.on_disk();
        assert_eq!(written.status, DaemonStatus::Exiting);
        assert_eq!(
            written.exit_reason,
            ExitReason::SIGNAL_TERM | ExitReason::SIGNAL_ABRT
        );
        assert_eq!(written.fatal.message.as_str(), "index out of bounds");
        assert_eq!(written.fatal.fingerprint, 7);
        assert!(written.dedup.is_empty());
    }

    #[rstest]
    fn recurring_fault_is_flagged_duplicate(harness: Harness) {
        let mut record = StatusRecord::default();
        let fingerprint = Fingerprint::of("", "", 0, "signal-segv");
        record.dedup.observe(fingerprint, 1);
        assert!(harness.capture.publish(&record));

        let outcome = harness.capture.capture(ExitReason::SIGNAL_SEGV);
        assert!(matches!(
            outcome,
            CaptureOutcome::Captured {
                duplicate: true,
                ..
            }
        ));
        assert!(harness.on_disk().fatal.duplicate);
    }

    #[rstest]
    fn publish_after_claim_is_abandoned(harness: Harness) {
        harness.capture.capture(ExitReason::FATAL);
        assert!(harness.capture.is_capturing());
        assert!(!harness.capture.publish(&StatusRecord::default()));
        assert_eq!(harness.on_disk().status, DaemonStatus::Running);
    }

    #[rstest]
    fn staged_detail_fills_an_empty_fatal_record(harness: Harness) {
        let mut detail = FatalRecord::default();
        detail.filename.set("src/collector.rs");
        detail.message.set("worker pool exhausted");
        detail.line = 17;
        detail.fingerprint = 99;
        assert!(harness.capture.stage(&detail));
        detail.message.set("second fault");
        assert!(!harness.capture.stage(&detail), "first detail is kept");

        harness.capture.capture(ExitReason::FATAL);
        let written = harness.on_disk();
        assert_eq!(written.fatal.message.as_str(), "worker pool exhausted");
        assert_eq!(written.fatal.line, 17);
        assert_eq!(
            written.fatal.fingerprint,
            Fingerprint::of("src/collector.rs", "", 17, "worker pool exhausted").value()
        );
        assert_eq!(written.dedup.len(), 1);
    }

    #[rstest]
    fn published_history_is_visible_without_the_mirrors(harness: Harness) {
        let fingerprint = Fingerprint::of("src/a.rs", "run", 3, "boom");
        assert!(!harness.capture.has_seen(fingerprint));
        let mut record = StatusRecord::default();
        record.dedup.observe(fingerprint, 1);
        assert!(harness.capture.publish(&record));
        assert!(harness.capture.has_seen(fingerprint));
    }

    #[test]
    fn concurrent_captures_write_one_record() {
        let dir = TempDir::new().expect("temp dir");
        let capture = Arc::new(FatalCapture::new(
            &dir.path().join("vigild-status.json"),
            &StatusRecord::default(),
            0,
        ));
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [ExitReason::SIGNAL_SEGV, ExitReason::SIGNAL_BUS]
            .into_iter()
            .map(|reason| {
                let capture = Arc::clone(&capture);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    capture.capture(reason)
                })
            })
            .collect();
        let outcomes: Vec<CaptureOutcome> = handles
            .into_iter()
            .map(|handle| handle.join().expect("join capture thread"))
            .collect();

        let dropped = outcomes
            .iter()
            .filter(|outcome| **outcome == CaptureOutcome::Dropped)
            .count();
        assert_eq!(dropped, 1);
        let record = capture.captured().expect("captured record");
        assert_eq!(record.exit_reason.bits().count_ones(), 1);
        assert_eq!(record.dedup.len(), 1);
    }

    #[test]
    fn installed_capture_receives_signals() {
        let dir = Box::leak(Box::new(TempDir::new().expect("temp dir")));
        let capture: &'static FatalCapture = Box::leak(Box::new(FatalCapture::new(
            &dir.path().join("vigild-status.json"),
            &StatusRecord::default(),
            0,
        )));
        capture.install();
        assert!(matches!(
            deadly_signal_received(ExitReason::SIGNAL_ILL),
            CaptureOutcome::Captured { .. }
        ));
        assert_eq!(
            deadly_signal_received(ExitReason::SIGNAL_ILL),
            CaptureOutcome::Dropped
        );
    }
}

//! Daemon status tracking and crash recovery.
//!
//! A long-running daemon keeps one [`StatusRecord`] per invocation on disk.
//! On startup the [`StatusTracker`] loads the record left by the previous run
//! and classifies it as a [`CrashVerdict`]: a clean exit, a crash while
//! initializing or running, a shutdown that never finished, or a record from
//! an earlier boot. The tracker then advances a fresh record through the
//! lifecycle, persisting every transition through the [`StatusStore`].
//!
//! ## Fatal capture
//!
//! Every change is mirrored into a [`FatalCapture`]. A signal handler calls
//! [`deadly_signal_received`], which claims the capture with a single atomic
//! flag, fills in the fault detail and writes the record with raw system
//! calls. That path never allocates, locks or logs, and concurrent captures
//! produce exactly one record.
//!
//! ## Recurring faults
//!
//! Faults are fingerprinted from their location and message. The
//! [`DedupRing`] remembers the last [`DEDUP_CAPACITY`] fingerprints across
//! restarts so recurring crashes are flagged as duplicates.

mod clock;
mod dedup;
mod detector;
mod error;
mod fatal;
mod raw;
mod record;
mod store;
mod text;
mod tracker;

pub use clock::{thread_tag, unix_micros, unix_secs};
pub use dedup::{DEDUP_CAPACITY, DedupEntry, DedupRing, DedupVerdict, Fingerprint};
pub use detector::CrashVerdict;
pub use error::StatusError;
pub use fatal::{CaptureOutcome, FatalCapture, deadly_signal_received};
pub use record::{
    DaemonStatus, DiskSnapshot, ERRNO_CAPACITY, Environment, ExitReason, FACT_CAPACITY,
    FILENAME_CAPACITY, FUNCTION_CAPACITY, FatalRecord, KERNEL_CAPACITY, MESSAGE_CAPACITY,
    MemorySnapshot, OsType, STACK_TRACE_CAPACITY, STEP_CAPACITY, StatusRecord, Steps,
    THREAD_CAPACITY, Timings, VERSION_CAPACITY,
};
pub use store::StatusStore;
pub use text::BoundedText;
pub use tracker::{SessionFacts, StatusTracker};

#[cfg(test)]
mod tests;

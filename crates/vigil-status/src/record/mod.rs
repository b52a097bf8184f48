//! The persisted lifecycle snapshot.
//!
//! [`StatusRecord`] is a fixed-layout value: every string is a
//! [`BoundedText`] and the dedup history is an inline ring, so copying or
//! encoding a record never allocates. That property is what lets the fatal
//! capture path work from a signal handler.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use vigil_config::Profile;

use crate::dedup::DedupRing;
use crate::text::BoundedText;

mod exit_reason;
mod serde_text;

pub use exit_reason::ExitReason;

/// Bytes reserved for the build version.
pub const VERSION_CAPACITY: usize = 32;
/// Bytes reserved for each startup/shutdown checkpoint.
pub const STEP_CAPACITY: usize = 64;
/// Bytes reserved for short environment facts.
pub const FACT_CAPACITY: usize = 64;
/// Bytes reserved for the kernel version string.
pub const KERNEL_CAPACITY: usize = 128;
/// Bytes reserved for the fatal source file name.
pub const FILENAME_CAPACITY: usize = 256;
/// Bytes reserved for the fatal function name.
pub const FUNCTION_CAPACITY: usize = 128;
/// Bytes reserved for the fatal message.
pub const MESSAGE_CAPACITY: usize = 512;
/// Bytes reserved for the operating system error text.
pub const ERRNO_CAPACITY: usize = 128;
/// Bytes reserved for the captured stack trace.
pub const STACK_TRACE_CAPACITY: usize = 4096;
/// Bytes reserved for the faulting thread's tag.
pub const THREAD_CAPACITY: usize = 32;

/// Daemon lifecycle state.
///
/// Variants are declared in lifecycle order; within one invocation the
/// status only moves forward.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    EnumString,
    Display,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum DaemonStatus {
    /// No lifecycle information yet.
    #[default]
    None,
    /// Startup is in progress.
    Initializing,
    /// Startup finished and the daemon is serving.
    Running,
    /// Shutdown has begun.
    Exiting,
    /// Shutdown completed.
    Exited,
}

/// Operating system family the daemon runs on.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, EnumString, Display, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum OsType {
    /// Not identified.
    #[default]
    Unknown,
    /// Linux.
    Linux,
    /// FreeBSD.
    Freebsd,
    /// macOS.
    Macos,
    /// Windows.
    Windows,
}

impl OsType {
    /// The family this binary was built for.
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(target_os = "linux") {
            Self::Linux
        } else if cfg!(target_os = "freebsd") {
            Self::Freebsd
        } else if cfg!(target_os = "macos") {
            Self::Macos
        } else if cfg!(target_os = "windows") {
            Self::Windows
        } else {
            Self::Unknown
        }
    }
}

/// Wall-clock boundaries of the lifecycle phases, in seconds since the epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// When the daemon entered `initializing`.
    pub init: u64,
    /// When the daemon entered `exiting`.
    pub exit: u64,
}

/// Point-in-time memory figures supplied by the host collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySnapshot {
    /// Installed RAM in bytes.
    pub ram_total_bytes: u64,
    /// RAM available for new allocations in bytes.
    pub ram_available_bytes: u64,
    /// Configured swap in bytes.
    pub swap_total_bytes: u64,
    /// Unused swap in bytes.
    pub swap_free_bytes: u64,
}

/// Point-in-time figures for the filesystem holding the state directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskSnapshot {
    /// Filesystem size in bytes.
    pub total_bytes: u64,
    /// Bytes available to the daemon.
    pub free_bytes: u64,
    /// Total inodes.
    pub inodes_total: u64,
    /// Inodes available to the daemon.
    pub inodes_free: u64,
    /// Whether the filesystem is mounted read-only.
    pub read_only: bool,
}

/// Descriptive facts about the host and installation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    /// Whether the host collaborator managed to gather these facts.
    pub populated: bool,
    /// How the daemon was installed (package, static build, container image).
    pub install_type: BoundedText<FACT_CAPACITY>,
    /// CPU architecture.
    pub architecture: BoundedText<FACT_CAPACITY>,
    /// Detected hypervisor, if any.
    pub virtualization: BoundedText<FACT_CAPACITY>,
    /// Detected container runtime, if any.
    pub container: BoundedText<FACT_CAPACITY>,
    /// Kernel release string.
    pub kernel_version: BoundedText<KERNEL_CAPACITY>,
    /// Operating system name.
    pub os_name: BoundedText<FACT_CAPACITY>,
    /// Operating system version.
    pub os_version: BoundedText<FACT_CAPACITY>,
    /// Operating system identifier.
    pub os_id: BoundedText<FACT_CAPACITY>,
    /// Identifiers of related operating systems.
    pub os_id_like: BoundedText<FACT_CAPACITY>,
}

/// Last startup and shutdown checkpoints reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Steps {
    /// Last initialisation phase reached.
    pub startup: BoundedText<STEP_CAPACITY>,
    /// Last teardown phase reached.
    pub shutdown: BoundedText<STEP_CAPACITY>,
}

/// Details of the fault that ended the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FatalRecord {
    /// Source line of the fault.
    pub line: u32,
    /// Source file of the fault.
    pub filename: BoundedText<FILENAME_CAPACITY>,
    /// Function that raised the fault.
    pub function: BoundedText<FUNCTION_CAPACITY>,
    /// Human-readable description.
    pub message: BoundedText<MESSAGE_CAPACITY>,
    /// Operating system error text at the time of the fault.
    pub errno: BoundedText<ERRNO_CAPACITY>,
    /// Stack trace text, truncated to capacity.
    pub stack_trace: BoundedText<STACK_TRACE_CAPACITY>,
    /// Tag of the thread that faulted.
    pub thread: BoundedText<THREAD_CAPACITY>,
    /// Fingerprint of the stable fault fields; zero when none was computed.
    pub fingerprint: u64,
    /// Whether the fingerprint had been seen before.
    pub duplicate: bool,
}

impl FatalRecord {
    /// Returns `true` when no fault detail has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.line == 0
            && self.filename.is_empty()
            && self.function.is_empty()
            && self.message.is_empty()
    }
}

/// Lifecycle snapshot of one daemon invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusRecord {
    /// Build or release identifier.
    pub version: BoundedText<VERSION_CAPACITY>,
    /// Lifecycle state at the time of the last write.
    #[serde(with = "serde_text::named")]
    pub status: DaemonStatus,
    /// Why the daemon is exiting; empty while it runs.
    pub exit_reason: ExitReason,
    /// Configuration profile of the run.
    #[serde(with = "serde_text::named")]
    pub profile: Profile,
    /// Operating system family.
    #[serde(with = "serde_text::named")]
    pub os_type: OsType,
    /// Host boot time in seconds since the epoch.
    pub boottime: u64,
    /// Seconds the daemon had been running at the last write.
    pub uptime: u64,
    /// Time of the last write in microseconds since the epoch.
    pub timestamp: u64,
    /// Number of daemon starts during the current boot session.
    pub restarts: u64,
    /// Identifier of the host boot session.
    #[serde(with = "serde_text::identifier")]
    pub boot_id: Uuid,
    /// Identifier of the process run that wrote the record.
    #[serde(with = "serde_text::identifier")]
    pub invocation: Uuid,
    /// Stable identifier of the host.
    #[serde(with = "serde_text::identifier")]
    pub host_id: Uuid,
    /// Identifier of the node in the wider monitoring fleet.
    #[serde(with = "serde_text::identifier")]
    pub node_id: Uuid,
    /// Identifier of the fleet claim.
    #[serde(with = "serde_text::identifier")]
    pub claim_id: Uuid,
    /// Phase boundary timestamps.
    pub timings: Timings,
    /// Memory snapshot.
    pub memory: MemorySnapshot,
    /// Disk snapshot for the state directory.
    pub disk_space: DiskSnapshot,
    /// Host and installation facts.
    pub environment: Environment,
    /// Last startup and shutdown checkpoints.
    pub steps: Steps,
    /// Fault detail, empty unless a fatal event was captured.
    pub fatal: FatalRecord,
    /// Recently seen fault fingerprints.
    pub dedup: DedupRing,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(DaemonStatus::None, "none")]
    #[case(DaemonStatus::Initializing, "initializing")]
    #[case(DaemonStatus::Exited, "exited")]
    fn status_names_are_snake_case(#[case] status: DaemonStatus, #[case] name: &str) {
        let text: &'static str = status.into();
        assert_eq!(text, name);
    }

    #[test]
    fn status_orders_by_lifecycle() {
        assert!(DaemonStatus::None < DaemonStatus::Initializing);
        assert!(DaemonStatus::Running < DaemonStatus::Exiting);
        assert!(DaemonStatus::Exiting < DaemonStatus::Exited);
    }

    #[test]
    fn missing_fields_default() {
        let record: StatusRecord =
            serde_json::from_str(r#"{"status": "running"}"#).expect("partial record parses");
        assert_eq!(record.status, DaemonStatus::Running);
        assert_eq!(record.restarts, 0);
        assert!(record.boot_id.is_nil());
    }

    #[test]
    fn unknown_values_default_instead_of_failing() {
        let record: StatusRecord = serde_json::from_str(
            r#"{
                "status": "hibernating",
                "os_type": 7,
                "boot_id": "not-a-uuid",
                "future_field": {"nested": true},
                "profile": "parent"
            }"#,
        )
        .expect("tolerant parse");
        assert_eq!(record.status, DaemonStatus::None);
        assert_eq!(record.os_type, OsType::Unknown);
        assert!(record.boot_id.is_nil());
        assert_eq!(record.profile, Profile::Parent);
    }

    #[test]
    fn fatal_record_starts_empty() {
        let mut fatal = FatalRecord::default();
        assert!(fatal.is_empty());
        fatal.message.set("boom");
        assert!(!fatal.is_empty());
    }
}

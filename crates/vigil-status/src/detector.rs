//! Classification of the previous run.

use uuid::Uuid;

use crate::record::{DaemonStatus, ExitReason, StatusRecord};

/// How the previous invocation ended, judged from its persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashVerdict {
    /// No usable prior record.
    FirstRun,
    /// The prior record belongs to an earlier boot of the host, so its
    /// lifecycle state says nothing about this boot.
    PreviousBoot {
        /// Exit reason of the prior run when it reached `exited`.
        last_exit_reason: Option<ExitReason>,
    },
    /// The prior run began shutting down but never finished.
    IncompleteShutdown {
        /// Exit reason recorded by the prior run.
        exit_reason: ExitReason,
    },
    /// The prior run stopped while initializing or running.
    Crashed {
        /// The prior run had not finished initializing.
        during_init: bool,
        /// Exit reason recorded by the prior run, often a deadly signal.
        exit_reason: ExitReason,
        /// The prior run captured fault detail.
        fatal_recorded: bool,
        /// The captured fault had been seen before.
        duplicate: bool,
    },
    /// The prior run shut down cleanly.
    CleanExit {
        /// Exit reason recorded by the prior run.
        exit_reason: ExitReason,
    },
}

impl CrashVerdict {
    /// Classifies `prior` against the current boot session.
    #[must_use]
    pub fn classify(prior: &StatusRecord, boot_id: Uuid) -> Self {
        if prior.status == DaemonStatus::None {
            return Self::FirstRun;
        }
        if prior.boot_id != boot_id {
            let last_exit_reason =
                (prior.status == DaemonStatus::Exited).then_some(prior.exit_reason);
            return Self::PreviousBoot { last_exit_reason };
        }
        match prior.status {
            DaemonStatus::Exiting => Self::IncompleteShutdown {
                exit_reason: prior.exit_reason,
            },
            DaemonStatus::Initializing | DaemonStatus::Running => Self::Crashed {
                during_init: prior.status == DaemonStatus::Initializing,
                exit_reason: prior.exit_reason,
                fatal_recorded: !prior.fatal.is_empty(),
                duplicate: prior.fatal.duplicate,
            },
            DaemonStatus::Exited | DaemonStatus::None => Self::CleanExit {
                exit_reason: prior.exit_reason,
            },
        }
    }

    /// Returns `true` when the prior run crashed during this boot.
    #[must_use]
    pub const fn is_crash(&self) -> bool {
        matches!(self, Self::Crashed { .. })
    }

    /// Returns `true` when the prior run was cut off mid-shutdown.
    #[must_use]
    pub const fn is_incomplete_shutdown(&self) -> bool {
        matches!(self, Self::IncompleteShutdown { .. })
    }

    /// Short label for logs and operator output.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::FirstRun => "first-run",
            Self::PreviousBoot { .. } => "previous-boot",
            Self::IncompleteShutdown { .. } => "incomplete-shutdown",
            Self::Crashed {
                during_init: true, ..
            } => "crashed-during-init",
            Self::Crashed { .. } => "crashed",
            Self::CleanExit { .. } => "clean-exit",
        }
    }
}

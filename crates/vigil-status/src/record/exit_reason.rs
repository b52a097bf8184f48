//! Why the daemon is exiting.

use std::fmt;

use bitflags::bitflags;
use serde::de::{Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

bitflags! {
    /// Set of reasons recorded for the current exit.
    ///
    /// The set is empty while the daemon runs normally. Several reasons may
    /// accumulate, for example a termination request followed by a fault
    /// during shutdown.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ExitReason: u32 {
        /// Bus error.
        const SIGNAL_BUS = 1 << 0;
        /// Invalid memory reference.
        const SIGNAL_SEGV = 1 << 1;
        /// Floating point exception.
        const SIGNAL_FPE = 1 << 2;
        /// Illegal instruction.
        const SIGNAL_ILL = 1 << 3;
        /// Abort, typically from a panic or failed assertion.
        const SIGNAL_ABRT = 1 << 4;
        /// Quit request.
        const SIGNAL_QUIT = 1 << 5;
        /// Termination request.
        const SIGNAL_TERM = 1 << 6;
        /// Interrupt from the terminal.
        const SIGNAL_INT = 1 << 7;
        /// Memory exhausted.
        const OUT_OF_MEMORY = 1 << 8;
        /// Another instance already holds the daemon lock.
        const ALREADY_RUNNING = 1 << 9;
        /// An explicit fatal error was raised.
        const FATAL = 1 << 10;
        /// Shutdown requested through the management API.
        const API_QUIT = 1 << 11;
        /// Shutdown requested through the command channel.
        const CMD_EXIT = 1 << 12;
        /// The service manager stopped the daemon.
        const SERVICE_STOP = 1 << 13;
        /// The host is shutting down.
        const SYSTEM_SHUTDOWN = 1 << 14;
        /// The daemon is restarting for an update.
        const UPDATE = 1 << 15;
    }
}

const REASON_NAMES: [(ExitReason, &str); 16] = [
    (ExitReason::SIGNAL_BUS, "signal-bus"),
    (ExitReason::SIGNAL_SEGV, "signal-segv"),
    (ExitReason::SIGNAL_FPE, "signal-fpe"),
    (ExitReason::SIGNAL_ILL, "signal-ill"),
    (ExitReason::SIGNAL_ABRT, "signal-abrt"),
    (ExitReason::SIGNAL_QUIT, "signal-quit"),
    (ExitReason::SIGNAL_TERM, "signal-term"),
    (ExitReason::SIGNAL_INT, "signal-int"),
    (ExitReason::OUT_OF_MEMORY, "out-of-memory"),
    (ExitReason::ALREADY_RUNNING, "already-running"),
    (ExitReason::FATAL, "fatal"),
    (ExitReason::API_QUIT, "api-quit"),
    (ExitReason::CMD_EXIT, "cmd-exit"),
    (ExitReason::SERVICE_STOP, "service-stop"),
    (ExitReason::SYSTEM_SHUTDOWN, "system-shutdown"),
    (ExitReason::UPDATE, "update"),
];

impl ExitReason {
    /// Reasons that mean the daemon died from a fault rather than a request.
    pub const DEADLY: Self = Self::SIGNAL_BUS
        .union(Self::SIGNAL_SEGV)
        .union(Self::SIGNAL_FPE)
        .union(Self::SIGNAL_ILL)
        .union(Self::SIGNAL_ABRT)
        .union(Self::OUT_OF_MEMORY)
        .union(Self::FATAL);

    /// Reasons that correspond to an orderly stop request.
    pub const NORMAL: Self = Self::SIGNAL_QUIT
        .union(Self::SIGNAL_TERM)
        .union(Self::SIGNAL_INT)
        .union(Self::API_QUIT)
        .union(Self::CMD_EXIT)
        .union(Self::SERVICE_STOP)
        .union(Self::SYSTEM_SHUTDOWN)
        .union(Self::UPDATE);

    /// Returns `true` when any recorded reason is a fault.
    #[must_use]
    pub const fn is_deadly(self) -> bool {
        self.intersects(Self::DEADLY)
    }

    /// Returns `true` when at least one reason is recorded and all of them
    /// are orderly stop requests.
    #[must_use]
    pub const fn is_normal(self) -> bool {
        !self.is_empty() && Self::NORMAL.contains(self)
    }

    /// Maps a signal number to its exit reason.
    #[cfg(unix)]
    #[must_use]
    pub const fn from_signal(signal: i32) -> Option<Self> {
        match signal {
            libc::SIGBUS => Some(Self::SIGNAL_BUS),
            libc::SIGSEGV => Some(Self::SIGNAL_SEGV),
            libc::SIGFPE => Some(Self::SIGNAL_FPE),
            libc::SIGILL => Some(Self::SIGNAL_ILL),
            libc::SIGABRT => Some(Self::SIGNAL_ABRT),
            libc::SIGQUIT => Some(Self::SIGNAL_QUIT),
            libc::SIGTERM => Some(Self::SIGNAL_TERM),
            libc::SIGINT => Some(Self::SIGNAL_INT),
            _ => None,
        }
    }

    /// Name of the lowest recorded reason, used as a fallback fatal message.
    #[must_use]
    pub fn primary_name(self) -> &'static str {
        self.names().next().unwrap_or("none")
    }

    /// Iterates over the persisted names of the recorded reasons.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        REASON_NAMES
            .into_iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, name)| name)
    }

    /// Looks up a reason by its persisted name.
    #[must_use]
    pub fn from_persisted_name(name: &str) -> Option<Self> {
        REASON_NAMES
            .iter()
            .find(|(_, candidate)| *candidate == name)
            .map(|(flag, _)| *flag)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return formatter.write_str("none");
        }
        for (index, name) in self.names().enumerate() {
            if index > 0 {
                formatter.write_str(", ")?;
            }
            formatter.write_str(name)?;
        }
        Ok(())
    }
}

impl Serialize for ExitReason {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let count = self.names().count();
        let mut sequence = serializer.serialize_seq(Some(count))?;
        for name in self.names() {
            sequence.serialize_element(name)?;
        }
        sequence.end()
    }
}

impl<'de> Deserialize<'de> for ExitReason {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ReasonVisitor)
    }
}

struct ReasonVisitor;

impl<'de> Visitor<'de> for ReasonVisitor {
    type Value = ExitReason;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a list of exit reason names")
    }

    fn visit_seq<A>(self, mut sequence: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut reason = ExitReason::empty();
        while let Some(name) = sequence.next_element::<Option<String>>()? {
            if let Some(flag) = name.as_deref().and_then(ExitReason::from_persisted_name) {
                reason |= flag;
            }
        }
        Ok(reason)
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(ExitReason::empty())
    }

    fn visit_none<E>(self) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(ExitReason::empty())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ExitReason::SIGNAL_SEGV, true)]
    #[case(ExitReason::FATAL | ExitReason::SIGNAL_TERM, true)]
    #[case(ExitReason::SIGNAL_TERM, false)]
    #[case(ExitReason::empty(), false)]
    fn classifies_deadly_reasons(#[case] reason: ExitReason, #[case] deadly: bool) {
        assert_eq!(reason.is_deadly(), deadly);
    }

    #[test]
    fn empty_reason_is_not_normal() {
        assert!(!ExitReason::empty().is_normal());
        assert!((ExitReason::SIGNAL_INT | ExitReason::SERVICE_STOP).is_normal());
    }

    #[test]
    fn display_joins_names() {
        let reason = ExitReason::SIGNAL_TERM | ExitReason::FATAL;
        assert_eq!(reason.to_string(), "signal-term, fatal");
        assert_eq!(ExitReason::empty().to_string(), "none");
    }

    #[test]
    fn unknown_names_are_ignored_when_loading() {
        let reason: ExitReason =
            serde_json::from_str(r#"["signal-segv", "cosmic-ray", null]"#).expect("list parses");
        assert_eq!(reason, ExitReason::SIGNAL_SEGV);
    }

    #[test]
    fn persisted_names_differ_from_flag_identifiers() {
        assert_eq!(
            ExitReason::from_persisted_name("signal-term"),
            Some(ExitReason::SIGNAL_TERM)
        );
        assert_eq!(ExitReason::from_persisted_name("SIGNAL_TERM"), None);
        assert_eq!(
            ExitReason::from_name("SIGNAL_TERM"),
            Some(ExitReason::SIGNAL_TERM)
        );
    }

    #[test]
    fn every_flag_has_a_name() {
        for flag in ExitReason::all().iter() {
            assert_ne!(flag.primary_name(), "none", "missing name for {flag:?}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn maps_signals_to_reasons() {
        assert_eq!(
            ExitReason::from_signal(libc::SIGSEGV),
            Some(ExitReason::SIGNAL_SEGV)
        );
        assert_eq!(ExitReason::from_signal(libc::SIGUSR1), None);
    }
}

//! Routing of deadly signals and panics into the status record.
//!
//! Deadly signals go through [`vigil_status::deadly_signal_received`], which
//! is async-signal-safe. The handler is installed with `SA_RESETHAND`, so
//! re-raising the signal afterwards terminates the process with the default
//! disposition and the usual exit status or core dump.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{self, PanicHookInfo};
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use thiserror::Error;
use tracing::error;

use vigil_status::{ExitReason, StatusTracker, deadly_signal_received};

const CRASH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::crash");

/// Signals that end the process and are captured into the status record.
pub(crate) const DEADLY_SIGNALS: [Signal; 5] = [
    Signal::SIGSEGV,
    Signal::SIGBUS,
    Signal::SIGILL,
    Signal::SIGFPE,
    Signal::SIGABRT,
];

/// Errors raised while installing fault handlers.
#[derive(Debug, Error)]
pub enum CrashHandlerError {
    /// Registering a signal disposition failed.
    #[error("failed to install handler for {signal}: {source}")]
    Install {
        /// Signal whose handler could not be installed.
        signal: Signal,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
}

/// Installs process-wide fault handlers bound to a tracker.
pub trait FaultHooks: Send + Sync {
    /// Routes deadly signals and panics into `tracker`.
    fn install(&self, tracker: &Arc<StatusTracker>) -> Result<(), CrashHandlerError>;
}

/// Installs real signal handlers and a panic hook.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFaultHooks;

impl FaultHooks for SystemFaultHooks {
    fn install(&self, tracker: &Arc<StatusTracker>) -> Result<(), CrashHandlerError> {
        tracker.fatal_capture().install();
        install_signal_handlers()?;
        install_panic_hook(Arc::clone(tracker));
        Ok(())
    }
}

fn install_signal_handlers() -> Result<(), CrashHandlerError> {
    let action = SigAction::new(
        SigHandler::Handler(on_deadly_signal),
        SaFlags::SA_RESETHAND | SaFlags::SA_ONSTACK,
        SigSet::empty(),
    );
    for signal in DEADLY_SIGNALS {
        // SAFETY: the handler only calls async-signal-safe functions.
        unsafe { sigaction(signal, &action) }
            .map_err(|source| CrashHandlerError::Install { signal, source })?;
    }
    Ok(())
}

extern "C" fn on_deadly_signal(signal: libc::c_int) {
    let reason = ExitReason::from_signal(signal).unwrap_or(ExitReason::FATAL);
    deadly_signal_received(reason);
    // SAFETY: SA_RESETHAND restored the default disposition before entry.
    unsafe {
        libc::raise(signal);
    }
}

/// Chains a hook that records panics in `tracker` before the previous hook.
pub(crate) fn install_panic_hook(tracker: Arc<StatusTracker>) {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        record_panic(&tracker, info);
        previous(info);
    }));
}

/// Registers a panic as the fatal event of this run.
///
/// The panicking thread may still hold the tracker's record lock, so nothing
/// here waits on it: when the exit reason cannot be saved normally the
/// record is written through the fatal capture instead.
pub(crate) fn record_panic(tracker: &StatusTracker, info: &PanicHookInfo<'_>) {
    let message = payload_text(info.payload());
    let (file, line) = info
        .location()
        .map_or(("", 0), |location| (location.file(), location.line()));
    let thread = std::thread::current();
    let function = thread.name().unwrap_or("unnamed thread");
    let backtrace = Backtrace::force_capture().to_string();
    let verdict = tracker.register_fatal(file, function, message, "", &backtrace, line);
    if !tracker.try_exit_reason_save(ExitReason::FATAL) {
        tracker.fatal_capture().capture(ExitReason::FATAL);
    }
    error!(
        target: CRASH_TARGET,
        %message,
        file,
        line,
        duplicate = verdict.is_duplicate(),
        "panic recorded"
    );
}

fn payload_text(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload")
}

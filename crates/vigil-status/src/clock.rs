//! Wall-clock and thread helpers usable from any context.
//!
//! Everything here is async-signal-safe on Linux: `clock_gettime`, `prctl`
//! and `gettid` are plain system calls and formatting goes into an inline
//! buffer.

use std::fmt::Write as _;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::record::THREAD_CAPACITY;
use crate::text::BoundedText;

/// Microseconds since the Unix epoch, or zero when the clock is before it.
#[must_use]
pub fn unix_micros() -> u64 {
    since_epoch()
        .map(|elapsed| u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Seconds since the Unix epoch, or zero when the clock is before it.
#[must_use]
pub fn unix_secs() -> u64 {
    since_epoch().map_or(0, |elapsed| elapsed.as_secs())
}

fn since_epoch() -> Option<Duration> {
    SystemTime::now().duration_since(UNIX_EPOCH).ok()
}

/// Short tag naming the calling thread, e.g. `collector:4711`.
#[must_use]
pub fn thread_tag() -> BoundedText<THREAD_CAPACITY> {
    let mut tag = BoundedText::new();
    write_thread_tag(&mut tag);
    tag
}

#[cfg(target_os = "linux")]
fn write_thread_tag(tag: &mut BoundedText<THREAD_CAPACITY>) {
    let mut name = [0_u8; 16];
    // SAFETY: PR_GET_NAME writes at most 16 bytes, including the NUL, into
    // the buffer.
    let named = unsafe { libc::prctl(libc::PR_GET_NAME, name.as_mut_ptr(), 0, 0, 0) } == 0;
    // SAFETY: gettid takes no arguments and cannot fail.
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    let length = name.iter().position(|byte| *byte == 0).unwrap_or(name.len());
    let label = if named {
        std::str::from_utf8(name.get(..length).unwrap_or_default()).unwrap_or("thread")
    } else {
        "thread"
    };
    if write!(tag, "{label}:{tid}").is_err() {
        tag.set("unknown");
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
fn write_thread_tag(tag: &mut BoundedText<THREAD_CAPACITY>) {
    // SAFETY: pthread_self has no preconditions.
    let handle = unsafe { libc::pthread_self() } as usize;
    if write!(tag, "thread:{handle:x}").is_err() {
        tag.set("unknown");
    }
}

#[cfg(not(unix))]
fn write_thread_tag(tag: &mut BoundedText<THREAD_CAPACITY>) {
    tag.set("unknown");
}

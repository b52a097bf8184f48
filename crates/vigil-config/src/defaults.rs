use camino::Utf8PathBuf;
use std::env;

#[cfg(unix)]
use libc::geteuid;

#[cfg(unix)]
use dirs::state_dir;

use crate::options::{LogFormat, Profile};

/// Directory name appended to the platform state or temporary directory.
pub const STATE_DIR_NAME: &str = "vigil";

/// Default log filter expression used by the daemon.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression used by the daemon.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the daemon.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default deployment profile.
pub fn default_profile() -> Profile {
    Profile::Standalone
}

/// Computes the default directory holding the persisted status record.
pub fn default_state_dir() -> Utf8PathBuf {
    default_state_dir_inner()
}

#[cfg(unix)]
fn default_state_dir_inner() -> Utf8PathBuf {
    if let Some(mut base) = state_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok()) {
        base.push(STATE_DIR_NAME);
        return base;
    }
    let mut base = fallback_base_directory();
    base.push(STATE_DIR_NAME);
    base.push(user_namespace());
    base
}

#[cfg(unix)]
fn fallback_base_directory() -> Utf8PathBuf {
    let candidate = env::temp_dir();
    Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

#[cfg(not(unix))]
fn default_state_dir_inner() -> Utf8PathBuf {
    let candidate = env::temp_dir();
    let mut base =
        Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("."));
    base.push(STATE_DIR_NAME);
    base
}

//! Shared configuration for the Vigil daemon.
//!
//! Configuration is layered by [`ortho_config`]: built-in defaults, then a
//! configuration file, then `VIGIL_*` environment variables, then command-line
//! flags. The resolved [`Config`] also determines where the daemon keeps its
//! persisted status record (see [`StatusPaths`]).

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};

mod defaults;
mod options;
mod paths;

pub use defaults::{
    DEFAULT_LOG_FILTER, STATE_DIR_NAME, default_log_filter, default_log_filter_string,
    default_log_format, default_profile, default_state_dir,
};
pub use options::{LogFormat, OptionParseError, Profile};
pub use paths::{STATUS_FILE_NAME, StatusPaths, StatusPathsError};

/// Resolved daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "VIGIL")]
pub struct Config {
    /// Directory holding the persisted status record.
    #[ortho_config(default = default_state_dir())]
    pub state_dir: Utf8PathBuf,
    /// `tracing` filter expression applied to daemon logs.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Encoding used for daemon logs.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Deployment profile recorded in status snapshots.
    #[ortho_config(default = default_profile())]
    pub profile: Profile,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            profile: default_profile(),
        }
    }
}

impl Config {
    /// Resolves configuration from the process arguments, environment and
    /// configuration files.
    pub fn resolve() -> Result<Self, Arc<OrthoError>> {
        Self::load()
    }

    /// Directory holding the persisted status record.
    #[must_use]
    pub fn state_dir(&self) -> &Utf8Path {
        self.state_dir.as_path()
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Deployment profile.
    #[must_use]
    pub fn profile(&self) -> Profile {
        self.profile
    }
}

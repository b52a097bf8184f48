//! Derives the on-disk location of the persisted status record.
//!
//! The daemon writes its lifecycle snapshot to a single well-known file so
//! that the next start, and any operator inspecting the host, can find it
//! without further configuration.

use std::fs::DirBuilder;
use std::io;
use std::path::{Path, PathBuf};

use camino::Utf8Path;
use thiserror::Error;

use crate::Config;

/// File name of the persisted status record inside the state directory.
pub const STATUS_FILE_NAME: &str = "vigild-status.json";

/// Canonical paths for the status artefacts written by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPaths {
    state_dir: PathBuf,
    status_path: PathBuf,
}

impl StatusPaths {
    /// Derives status paths from the shared configuration, creating the state
    /// directory when it does not yet exist.
    pub fn from_config(config: &Config) -> Result<Self, StatusPathsError> {
        Self::in_directory(config.state_dir())
    }

    /// Builds status paths rooted at `directory`, creating it when missing.
    pub fn in_directory(directory: &Utf8Path) -> Result<Self, StatusPathsError> {
        if directory.as_str().is_empty() {
            return Err(StatusPathsError::EmptyStateDir);
        }
        let state_dir = directory.as_std_path().to_path_buf();
        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        if let Err(source) = builder.create(&state_dir)
            && source.kind() != io::ErrorKind::AlreadyExists
        {
            return Err(StatusPathsError::StateDirectory {
                path: state_dir,
                source,
            });
        }
        Ok(Self {
            status_path: state_dir.join(STATUS_FILE_NAME),
            state_dir,
        })
    }

    /// Directory holding the status artefacts.
    pub fn state_dir(&self) -> &Path {
        self.state_dir.as_path()
    }

    /// Path to the persisted status record.
    pub fn status_path(&self) -> &Path {
        self.status_path.as_path()
    }
}

/// Errors raised while deriving status paths.
#[derive(Debug, Error)]
pub enum StatusPathsError {
    /// The configured state directory was empty.
    #[error("state directory must not be empty")]
    EmptyStateDir,
    /// Creating the state directory failed.
    #[error("failed to prepare state directory '{path}': {source}")]
    StateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    #[test]
    fn derives_status_file_inside_state_dir() {
        let temp = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(temp.path().join("nested/state"))
            .expect("utf8 temp path");
        let mut config = Config::default();
        config.state_dir = root.clone();

        let paths = StatusPaths::from_config(&config).expect("paths should derive");

        assert!(paths.state_dir().is_dir(), "state dir should be created");
        assert_eq!(paths.status_path(), root.join(STATUS_FILE_NAME).as_std_path());
    }

    #[test]
    fn rejects_empty_state_dir() {
        let error = StatusPaths::in_directory(Utf8Path::new(""))
            .expect_err("empty directory should be rejected");
        assert!(matches!(error, StatusPathsError::EmptyStateDir));
    }

    #[cfg(unix)]
    #[test]
    fn creates_state_dir_with_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().expect("temp dir");
        let root =
            Utf8PathBuf::from_path_buf(temp.path().join("private")).expect("utf8 temp path");
        let paths = StatusPaths::in_directory(&root).expect("paths should derive");
        let mode = std::fs::metadata(paths.state_dir())
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}

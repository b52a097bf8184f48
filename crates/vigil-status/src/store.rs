//! Normal-path persistence of the status record.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::Builder;
use tracing::{debug, warn};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use vigil_config::StatusPaths;

use crate::error::StatusError;
use crate::record::StatusRecord;

const STORE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::store");

/// Reads and writes the status file at a fixed location.
#[derive(Debug, Clone)]
pub struct StatusStore {
    paths: StatusPaths,
}

impl StatusStore {
    /// Creates a store for the given state directory layout.
    #[must_use]
    pub fn new(paths: StatusPaths) -> Self {
        Self { paths }
    }

    /// Filesystem layout used by the store.
    #[must_use]
    pub fn paths(&self) -> &StatusPaths {
        &self.paths
    }

    /// Path of the status file.
    #[must_use]
    pub fn status_path(&self) -> &Path {
        self.paths.status_path()
    }

    /// Loads the prior record.
    ///
    /// Never fails: a missing, unreadable or malformed file yields the
    /// default record, whose status is `none`.
    #[must_use]
    pub fn load(&self) -> StatusRecord {
        match self.try_load() {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(
                    target: STORE_TARGET,
                    path = %self.status_path().display(),
                    "no prior status file"
                );
                StatusRecord::default()
            }
            Err(error) => {
                warn!(
                    target: STORE_TARGET,
                    path = %self.status_path().display(),
                    %error,
                    "ignoring unusable status file"
                );
                StatusRecord::default()
            }
        }
    }

    /// Loads the prior record, distinguishing a missing file from a bad one.
    pub fn try_load(&self) -> Result<Option<StatusRecord>, StatusError> {
        let path = self.status_path();
        let contents = match fs::read(path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StatusError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_slice(&contents)
            .map(Some)
            .map_err(|source| StatusError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Atomically replaces the status file with `record`.
    ///
    /// Readers observe either the previous file or the new one.
    pub fn save(&self, record: &StatusRecord) -> Result<(), StatusError> {
        self.save_unless(record, || false)
    }

    /// Like [`StatusStore::save`], but asks `abandon` once the new contents
    /// are synced and discards them instead of renaming when it answers
    /// `true`.
    pub(crate) fn save_unless(
        &self,
        record: &StatusRecord,
        abandon: impl FnOnce() -> bool,
    ) -> Result<(), StatusError> {
        let path = self.status_path();
        let mut encoded =
            serde_json::to_vec_pretty(record).map_err(|source| StatusError::Serialise {
                path: path.to_path_buf(),
                source,
            })?;
        encoded.push(b'\n');
        let persisted =
            atomic_write(path, &encoded, abandon).map_err(|source| StatusError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        if persisted {
            Ok(())
        } else {
            Err(StatusError::Abandoned)
        }
    }
}

/// Writes `contents` through a synced temporary file renamed over `path`.
///
/// Returns `Ok(false)` when `abandon` vetoed the rename; the temporary file
/// is removed.
fn atomic_write(
    path: &Path,
    contents: &[u8],
    abandon: impl FnOnce() -> bool,
) -> io::Result<bool> {
    let directory = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "status path did not have a parent directory",
        )
    })?;

    let mut builder = Builder::new();
    builder.prefix(".vigild-status");
    builder.suffix(".tmp");
    #[cfg(unix)]
    {
        builder.permissions(fs::Permissions::from_mode(0o600));
    }

    let mut file = builder.tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    if abandon() {
        file.close()?;
        return Ok(false);
    }
    file.persist(path).map_err(|error| error.error)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;
    use crate::record::DaemonStatus;

    struct Fixture {
        _dir: TempDir,
        store: StatusStore,
    }

    #[fixture]
    fn fixture() -> Fixture {
        let dir = TempDir::new().expect("create temp dir");
        let path = Utf8Path::from_path(dir.path()).expect("utf-8 temp dir");
        let paths = StatusPaths::in_directory(path).expect("status paths");
        Fixture {
            store: StatusStore::new(paths),
            _dir: dir,
        }
    }

    #[rstest]
    fn missing_file_loads_default(fixture: Fixture) {
        assert_eq!(fixture.store.load(), StatusRecord::default());
        assert!(matches!(fixture.store.try_load(), Ok(None)));
    }

    #[rstest]
    fn saved_record_reloads_equal(fixture: Fixture) {
        let mut record = StatusRecord::default();
        record.status = DaemonStatus::Running;
        record.restarts = 3;
        record.steps.startup.set("collectors");
        record.fatal.stack_trace.set("frame 0\nframe 1");
        fixture.store.save(&record).expect("save record");
        assert_eq!(fixture.store.load(), record);
    }

    #[rstest]
    fn malformed_file_loads_default(fixture: Fixture) {
        fs::write(fixture.store.status_path(), b"{\"status\": \"runn").expect("write torn file");
        assert_eq!(fixture.store.load(), StatusRecord::default());
        assert!(matches!(
            fixture.store.try_load(),
            Err(StatusError::Parse { .. })
        ));
    }

    #[rstest]
    fn stray_temporary_file_is_ignored(fixture: Fixture) {
        let mut record = StatusRecord::default();
        record.status = DaemonStatus::Exited;
        fixture.store.save(&record).expect("save record");

        let directory = fixture.store.status_path().parent().expect("parent");
        fs::write(directory.join(".vigild-status1234.tmp"), b"{\"status\": ")
            .expect("write partial temp file");
        fs::write(directory.join("vigild-status.json.fatal.tmp"), b"{")
            .expect("write partial fatal temp file");

        assert_eq!(fixture.store.load().status, DaemonStatus::Exited);
    }

    #[rstest]
    fn vetoed_save_leaves_the_previous_file(fixture: Fixture) {
        let mut record = StatusRecord::default();
        record.status = DaemonStatus::Running;
        fixture.store.save(&record).expect("save record");

        record.status = DaemonStatus::Exiting;
        let outcome = fixture.store.save_unless(&record, || true);
        assert!(matches!(outcome, Err(StatusError::Abandoned)));
        assert_eq!(fixture.store.load().status, DaemonStatus::Running);

        let directory = fixture.store.status_path().parent().expect("parent");
        let leftovers = fs::read_dir(directory)
            .expect("list state dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[cfg(unix)]
    #[rstest]
    fn status_file_is_private(fixture: Fixture) {
        fixture
            .store
            .save(&StatusRecord::default())
            .expect("save record");
        let mode = fs::metadata(fixture.store.status_path())
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

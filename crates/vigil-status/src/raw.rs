//! Signal-safe persistence.
//!
//! Everything that needs the allocator happens in [`RawPersister::new`]; the
//! write path only encodes into a caller-supplied buffer and issues raw
//! system calls.

use std::io;
use std::path::Path;

use crate::record::StatusRecord;

/// Bytes reserved for an encoded record.
///
/// Sized for the worst case where every text byte is escaped as `\uXXXX`.
pub(crate) const ENCODE_CAPACITY: usize = 64 * 1024;

/// `io::Write` over a fixed slice that refuses to grow.
pub(crate) struct SliceWriter<'a> {
    buffer: &'a mut [u8],
    written: usize,
}

impl<'a> SliceWriter<'a> {
    pub(crate) fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, written: 0 }
    }

    pub(crate) fn written(&self) -> &[u8] {
        self.buffer.get(..self.written).unwrap_or_default()
    }
}

impl io::Write for SliceWriter<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let end = self.written + data.len();
        let Some(target) = self.buffer.get_mut(self.written..end) else {
            return Err(io::ErrorKind::WriteZero.into());
        };
        target.copy_from_slice(data);
        self.written = end;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Encodes `record` as compact JSON into `buffer`.
///
/// Returns the encoded bytes, or `None` when the buffer is too small.
pub(crate) fn encode_into<'a>(record: &StatusRecord, buffer: &'a mut [u8]) -> Option<&'a [u8]> {
    let mut writer = SliceWriter::new(buffer);
    serde_json::to_writer(&mut writer, record).ok()?;
    let length = writer.written().len();
    let encoded: &'a [u8] = buffer;
    encoded.get(..length)
}

/// Writes pre-encoded bytes to the status file with raw system calls.
#[derive(Debug)]
pub(crate) struct RawPersister {
    #[cfg(unix)]
    paths: Option<(std::ffi::CString, std::ffi::CString)>,
}

impl RawPersister {
    /// Captures the target and temporary paths as C strings.
    ///
    /// A path that cannot be expressed as a C string disables the persister.
    #[cfg(unix)]
    pub(crate) fn new(target: &Path) -> Self {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let bytes = target.as_os_str().as_bytes();
        let mut temporary = bytes.to_vec();
        temporary.extend_from_slice(b".fatal.tmp");
        let paths = CString::new(bytes)
            .ok()
            .zip(CString::new(temporary).ok());
        Self { paths }
    }

    #[cfg(not(unix))]
    pub(crate) fn new(_target: &Path) -> Self {
        Self {}
    }

    /// Atomically replaces the status file with `contents`.
    ///
    /// Returns `false` on any failure; nothing is logged.
    #[cfg(unix)]
    pub(crate) fn write(&self, contents: &[u8]) -> bool {
        let Some((target, temporary)) = &self.paths else {
            return false;
        };
        // SAFETY: both paths are NUL-terminated and outlive the calls; the
        // calls used are async-signal-safe.
        unsafe {
            let fd = libc::open(
                temporary.as_ptr(),
                libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC | libc::O_CLOEXEC,
                0o600 as libc::c_uint,
            );
            if fd < 0 {
                return false;
            }
            let written = write_all(fd, contents) && libc::fsync(fd) == 0;
            let closed = libc::close(fd) == 0;
            if !(written && closed) {
                libc::unlink(temporary.as_ptr());
                return false;
            }
            libc::rename(temporary.as_ptr(), target.as_ptr()) == 0
        }
    }

    #[cfg(not(unix))]
    pub(crate) fn write(&self, _contents: &[u8]) -> bool {
        false
    }
}

#[cfg(unix)]
fn write_all(fd: libc::c_int, mut contents: &[u8]) -> bool {
    while !contents.is_empty() {
        // SAFETY: the pointer and length describe a live slice.
        let result = unsafe { libc::write(fd, contents.as_ptr().cast(), contents.len()) };
        if result < 0 {
            if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return false;
        }
        let advanced = usize::try_from(result).unwrap_or(0);
        if advanced == 0 {
            return false;
        }
        contents = contents.get(advanced..).unwrap_or_default();
    }
    true
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::record::DaemonStatus;

    #[test]
    fn slice_writer_refuses_overflow() {
        let mut buffer = [0_u8; 4];
        let mut writer = SliceWriter::new(&mut buffer);
        assert!(io::Write::write_all(&mut writer, b"abc").is_ok());
        let error = io::Write::write_all(&mut writer, b"de").expect_err("overflow");
        assert_eq!(error.kind(), io::ErrorKind::WriteZero);
        assert_eq!(writer.written(), b"abc");
    }

    #[test]
    fn full_record_fits_the_encode_buffer() {
        let mut record = StatusRecord::default();
        let control = "\u{1}".repeat(5000);
        record.fatal.stack_trace.set(&control);
        record.fatal.message.set(&control);
        record.fatal.filename.set(&control);
        record.environment.kernel_version.set(&control);
        let mut buffer = vec![0_u8; ENCODE_CAPACITY];
        assert!(encode_into(&record, &mut buffer).is_some());
    }

    #[cfg(unix)]
    #[test]
    fn raw_write_replaces_the_target() {
        let dir = TempDir::new().expect("temp dir");
        let target = dir.path().join("vigild-status.json");
        fs::write(&target, b"stale").expect("seed target");

        let mut record = StatusRecord::default();
        record.status = DaemonStatus::Running;
        let mut buffer = vec![0_u8; ENCODE_CAPACITY];
        let encoded = encode_into(&record, &mut buffer).expect("encode");

        assert!(RawPersister::new(&target).write(encoded));
        let reloaded: StatusRecord =
            serde_json::from_slice(&fs::read(&target).expect("read")).expect("parse");
        assert_eq!(reloaded, record);
        assert!(!dir.path().join("vigild-status.json.fatal.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn raw_write_reports_missing_directory() {
        let dir = TempDir::new().expect("temp dir");
        let target = dir.path().join("absent").join("vigild-status.json");
        assert!(!RawPersister::new(&target).write(b"{}"));
    }
}

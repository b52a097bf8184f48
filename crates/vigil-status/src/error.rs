//! Error surface of the status store.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures raised while reading or writing the status file.
#[derive(Debug, Error)]
pub enum StatusError {
    /// The status file exists but could not be read.
    #[error("failed to read status file '{path}': {source}")]
    Read {
        /// Status file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The status file content was not a status record.
    #[error("failed to parse status file '{path}': {source}")]
    Parse {
        /// Status file path.
        path: PathBuf,
        /// Underlying decoder error.
        #[source]
        source: serde_json::Error,
    },
    /// The record could not be encoded.
    #[error("failed to encode status record for '{path}': {source}")]
    Serialise {
        /// Status file path.
        path: PathBuf,
        /// Underlying encoder error.
        #[source]
        source: serde_json::Error,
    },
    /// Writing or renaming the status file failed.
    #[error("failed to write status file '{path}': {source}")]
    Write {
        /// Status file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A fatal capture owns the status file; normal writes are abandoned.
    #[error("status write abandoned because a fatal capture is in progress")]
    Abandoned,
}

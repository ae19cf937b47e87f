//! The engine-wide error type.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced by the engine.
///
/// `Clone` so one group-commit outcome can be delivered to every writer
/// that was merged into the commit; I/O errors sit behind an `Arc` for
/// that reason. "Not found" is not an error; reads return `Ok(None)`.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Checksum mismatch or a malformed batch, record, or edit.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(Arc<io::Error>),

    /// Caller misuse (bad option, comparator mismatch, missing store).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Requested behavior this build does not provide.
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(Arc::new(e))
    }
}

impl From<version::VersionError> for Error {
    fn from(e: version::VersionError) -> Error {
        match e {
            version::VersionError::Io(io) => Error::Io(Arc::new(io)),
            version::VersionError::Corrupt(msg) => Error::Corruption(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

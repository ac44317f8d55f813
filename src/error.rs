//! Crate-wide error type.
//!
//! Each subsystem gets its own `thiserror` enum; [`Error`] unifies them with
//! `#[from]` conversions so call sites can use `?` across subsystem
//! boundaries without manual mapping.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("blob {0} not found in store")]
    NotFound(String),
    #[error("blob store io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("filter_applied encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("filter_applied decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("source rootfs {0:?} does not exist or is not a directory")]
    InvalidSource(PathBuf),
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("ingest aborted: cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("source/read size mismatch for {digest}: declared {declared}, read {read}")]
    SizeMismatch {
        digest: String,
        declared: u64,
        read: u64,
    },
    #[error("referenced blob {0} missing from store")]
    MissingBlob(String),
    #[error("filter aborted: cancelled")]
    Cancelled,
}

/// Unified crate error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    BlobStore(#[from] BlobStoreError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("corrupt state: {0}")]
    CorruptState(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Db(DbError::Sqlite(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Print `ERR: {msg}` to stderr and exit with `code`.
///
/// Mirrors the original builder's `exit_with_err_msg`: user-visible failure
/// is a single line, full detail goes to the logger.
pub fn exit_with_err_msg(msg: &str, code: i32) -> ! {
    eprintln!("ERR: {msg}");
    std::process::exit(code);
}

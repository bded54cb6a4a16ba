use std::fmt;
use std::io;

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Error conditions surfaced by the engine's public API.
///
/// Variants line up with the exit conditions a caller distinguishes on:
/// not-found lookups, bad arguments, lock contention, I/O failure,
/// writes attempted on a read-only transaction, and a tombstoned file.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Key not present (get/delete) or the tree is empty.
    NotFound,
    /// Empty or oversized key, or a value that fails validation.
    InvalidArgument(String),
    /// Another writer already holds the database's exclusive lock.
    Busy,
    /// Short read/write, or other filesystem failure.
    Io(io::Error),
    /// A mutating operation was attempted on a read-only transaction.
    Permission,
    /// The file was tombstoned by a compaction pass; reopen by path.
    Stale,
    /// The file's header, meta pages, or a tree page failed validation.
    Corrupted(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound => write!(f, "key not found"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::Busy => write!(f, "database is locked by another writer"),
            Error::Io(err) => write!(f, "I/O error: {err}"),
            Error::Permission => write!(f, "write attempted on a read-only transaction"),
            Error::Stale => write!(f, "database file was tombstoned by compaction"),
            Error::Corrupted(msg) => write!(f, "database corrupted: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

//! Error types for the MVCC storage engine.

use std::fmt;

/// The main error type for mvccdb-core operations.
///
/// Variants map onto the error kinds in the engine's error-handling design:
/// `NotFound`, `Serialization`, `LockTimeout`, `InvalidState`,
/// `InvalidArgument`, and `Internal` are the ones a caller should branch on;
/// `LockPoisoned`/`Io` are ambient plumbing.
#[derive(Debug)]
pub enum Error {
    /// A lock was poisoned (internal error).
    LockPoisoned,

    /// I/O error (reserved for future persistence; not produced today).
    Io(std::io::Error),

    /// Table, column, transaction, or tuple id missing.
    NotFound(String),

    /// A write could not be performed without violating the isolation
    /// contract; the caller may retry with a new transaction.
    Serialization(String),

    /// A row-lock wait exceeded `max_lock_wait_ms`; the caller may retry.
    LockTimeout(String),

    /// Bad operation for the current transaction or statement state.
    InvalidState(String),

    /// Bad argument: placeholder count, unknown isolation level, etc.
    InvalidArgument(String),

    /// Invariant violation detected during the visibility walk or
    /// elsewhere. The tuple under inspection is left untouched.
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::LockPoisoned => write!(f, "lock poisoned"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::NotFound(msg) => write!(f, "not found: {}", msg),
            Error::Serialization(msg) => write!(f, "serialization failure: {}", msg),
            Error::LockTimeout(msg) => write!(f, "lock timeout: {}", msg),
            Error::InvalidState(msg) => write!(f, "invalid state: {}", msg),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

/// A specialized `Result` type for mvccdb-core operations.
pub type Result<T> = std::result::Result<T, Error>;

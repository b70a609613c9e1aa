//! Error kinds for SharpCoreDB.
//!
//! This module defines the unified error type returned by every layer of
//! the storage engine. Each variant corresponds to one of the error kinds
//! named in the storage engine specification: every error carries a stable
//! kind plus a human-readable message so hosts can map kinds to HTTP status
//! codes, process exit codes, or log severities without string-matching.

use std::io;
use thiserror::Error;

/// Result type alias used throughout SharpCoreDB.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds produced by the storage engine core.
#[derive(Debug, Error)]
pub enum Error {
    /// Table, index, column, row, or block missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate table, index, or primary key.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Type mismatch, dimension mismatch, or oversized value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Insert collided with an existing primary key value.
    #[error("primary key violation: {0}")]
    PrimaryKeyViolation(String),

    /// Authentication tag mismatch while opening the registry block.
    #[error("wrong password")]
    WrongPassword,

    /// Authentication tag mismatch on a block read after the registry
    /// opened successfully.
    #[error("tamper detected in block {0}")]
    TamperDetected(String),

    /// Checksum mismatch outside the recoverable WAL tail.
    #[error("corrupt: {0}")]
    Corrupt(String),

    /// The file cannot grow any further.
    #[error("out of space: {0}")]
    OutOfSpace(String),

    /// A write was attempted while a batch update is in progress on
    /// another thread.
    #[error("busy: {0}")]
    Busy(String),

    /// A mutation was attempted on a read-only handle.
    #[error("read only")]
    ReadOnly,

    /// The database is recovering or closing.
    #[error("not ready: {0}")]
    NotReady(String),

    /// The operation was interrupted by a cancellation token.
    #[error("cancelled")]
    Cancelled,

    /// Underlying OS error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// True for errors that indicate the on-disk file is internally
    /// inconsistent and requires the repair path.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::Corrupt(_) | Error::TamperDetected(_) | Error::WrongPassword
        )
    }

    /// True for errors a caller may retry after supplying upsert intent
    /// (see §7 propagation rules: `PrimaryKeyViolation` recovers locally
    /// only when the caller asked for upsert semantics).
    pub fn is_locally_recoverable(&self) -> bool {
        matches!(self, Error::PrimaryKeyViolation(_))
    }

    /// True for errors that reflect transient contention rather than a
    /// structural problem, worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Busy(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_classification() {
        assert!(Error::Corrupt("bad checksum".into()).is_corruption());
        assert!(Error::TamperDetected("users".into()).is_corruption());
        assert!(Error::WrongPassword.is_corruption());
        assert!(!Error::NotFound("users".into()).is_corruption());
    }

    #[test]
    fn primary_key_violation_is_locally_recoverable() {
        let e = Error::PrimaryKeyViolation("id=1".into());
        assert!(e.is_locally_recoverable());
        assert!(!e.is_retryable());
    }

    #[test]
    fn busy_is_retryable() {
        assert!(Error::Busy("batch in progress".into()).is_retryable());
    }

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(Error::ReadOnly.to_string(), "read only");
        assert_eq!(Error::Cancelled.to_string(), "cancelled");
    }
}

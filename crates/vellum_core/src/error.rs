//! Error types for the record cache.

use std::io;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur in cache operations.
///
/// Violations of the lock discipline (touching a record whose stripe the
/// current thread does not hold) are not errors: they panic.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Storage engine error.
    #[error("storage error: {0}")]
    Storage(#[from] vellum_storage::StorageError),

    /// Key or value codec error.
    #[error("codec error: {0}")]
    Codec(#[from] vellum_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record already attached to a table was put as a fresh record.
    #[error("put shared record: table={table},key={key}")]
    SharedRecord {
        /// Table name.
        table: String,
        /// Debug rendering of the key.
        key: String,
    },

    /// A record was modified under a key holding a different record.
    #[error("modify unmatched record: table={table},key={key}")]
    UnmatchedRecord {
        /// Table name.
        table: String,
        /// Debug rendering of the key.
        key: String,
    },

    /// A stripe changed while it was released; the transaction must restart.
    #[error("stripe {stripe} changed while released, transaction must be redone")]
    Redo {
        /// Index of the stripe whose version moved.
        stripe: usize,
    },

    /// A transaction kept conflicting and was given up.
    #[error("transaction redone {attempts} times without completing")]
    RedoLimitExceeded {
        /// Number of attempts made.
        attempts: u32,
    },

    /// Stripe locks could not be acquired in time.
    #[error("lock acquisition timed out after {timeout_ms}ms")]
    LockTimeout {
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// A table with the same id or name is already open.
    #[error("table already exists: {name}")]
    TableExists {
        /// Name of the conflicting table.
        name: String,
    },

    /// A full flush left records unwritten.
    #[error("flush incomplete: {remaining} records still dirty")]
    FlushIncomplete {
        /// Records left in write-back caches.
        remaining: usize,
    },

    /// Transaction was aborted by its unit of work.
    #[error("transaction aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },

    /// Invalid operation.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of what was invalid.
        message: String,
    },

    /// The cache manager has been shut down.
    #[error("cache manager is closed")]
    Closed,
}

impl CacheError {
    /// Create a shared record error.
    pub fn shared_record(table: &str, key: &impl std::fmt::Debug) -> Self {
        Self::SharedRecord {
            table: table.to_string(),
            key: format!("{key:?}"),
        }
    }

    /// Create an unmatched record error.
    pub fn unmatched_record(table: &str, key: &impl std::fmt::Debug) -> Self {
        Self::UnmatchedRecord {
            table: table.to_string(),
            key: format!("{key:?}"),
        }
    }

    /// Create an aborted error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Create an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns `true` if this error asks for the transaction to be re-run.
    #[must_use]
    pub const fn is_redo(&self) -> bool {
        matches!(self, Self::Redo { .. })
    }
}

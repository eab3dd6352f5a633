//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another process holds the storage directory.
    #[error("storage directory locked: {0}")]
    Locked(String),

    /// The table name cannot be used as a file name.
    #[error("invalid table name: {0:?}")]
    InvalidTableName(String),
}

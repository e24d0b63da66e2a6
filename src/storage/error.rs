//! Storage error types
//!
//! Defines all errors that can occur in the persistent record store.

use thiserror::Error;

/// Errors that can occur in the record store
#[derive(Error, Debug)]
pub enum StorageError {
    /// The persistent store cannot be opened or used (e.g. private mode,
    /// read-only profile directory). Callers keep working in memory.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A stored record failed to parse or validate
    #[error("Malformed record {key}: {reason}")]
    MalformedRecord { key: String, reason: String },

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Unavailable(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

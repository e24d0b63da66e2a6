//! Session layer errors
//!
//! Aggregates the per-layer errors for operations that touch both the store
//! and the remote API.

use crate::remote::RemoteError;
use crate::storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Remote fetch failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("Unknown user: {0}")]
    UnknownUser(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        let err: SessionError = StorageError::Unavailable("gone".into()).into();
        assert_eq!(err.to_string(), "Storage error: Storage unavailable: gone");

        let err: SessionError = RemoteError::Timeout.into();
        assert_eq!(err.to_string(), "Remote fetch failed: Request timeout");
    }
}

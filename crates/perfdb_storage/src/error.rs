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

    /// A document could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The embedded SQL engine reported an error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The persisted store is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// `exit_transaction` was called without a matching `enter_transaction`.
    #[error("no transaction in progress")]
    NoTransaction,

    /// A table or field name cannot be used as an identifier.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// The remote service rejected a request.
    #[error("remote error ({status}): {message}")]
    Remote {
        /// HTTP status reported by the service.
        status: u16,
        /// Error message reported by the service.
        message: String,
    },

    /// The request never reached the remote service.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote backend is not connected.
    #[error("not connected to remote storage")]
    NotConnected,

    /// The remote service refused the credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Transport { retryable, .. } => *retryable,
            StorageError::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(StorageError::transport_retryable("connection reset").is_retryable());
        assert!(!StorageError::transport_fatal("bad certificate").is_retryable());
        assert!(StorageError::Remote {
            status: 503,
            message: "busy".into()
        }
        .is_retryable());
        assert!(!StorageError::NoTransaction.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = StorageError::InvalidIdentifier("bad\"name".into());
        assert!(err.to_string().contains("bad"));

        let err = StorageError::Remote {
            status: 404,
            message: "no such database".into(),
        };
        assert_eq!(err.to_string(), "remote error (404): no such database");
    }
}

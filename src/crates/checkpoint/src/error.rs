//! Error types for checkpoint operations
//!
//! "Not found" is deliberately absent: reads that match nothing return
//! `Ok(None)` or an empty stream.

use thiserror::Error;

/// Boxed backend error, kept as the `source` of the wrapping variant
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur during checkpoint operations
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// The config carried no (or an empty) `thread_id` where one is required
    #[error("thread_id is required")]
    MissingIdentity,

    /// Backing store unreachable, pool exhausted, or the transaction aborted
    #[error("Connection failure: {0}")]
    ConnectionFailure(#[source] BoxError),

    /// A write collided with a key the upsert path does not absorb
    #[error("Constraint violation: {0}")]
    ConstraintViolation(#[source] BoxError),

    /// Any other backend failure (row decoding, protocol errors)
    #[error("Storage error: {0}")]
    Storage(#[source] BoxError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored data did not have the expected shape
    #[error("Invalid checkpoint: {0}")]
    Invalid(String),

    /// Store configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckpointError {
    /// Whether the error came from a rejected write rather than an unavailable store
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::ConstraintViolation(_))
    }

    /// Whether the error means the backing store could not be reached or the
    /// transaction did not commit
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::ConnectionFailure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_source_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = CheckpointError::ConnectionFailure(Box::new(io));

        assert!(err.is_connection_failure());
        assert!(!err.is_constraint_violation());
        assert_eq!(err.source().unwrap().to_string(), "refused");
        assert_eq!(err.to_string(), "Connection failure: refused");
    }

    #[test]
    fn test_missing_identity_message() {
        assert_eq!(
            CheckpointError::MissingIdentity.to_string(),
            "thread_id is required"
        );
    }
}

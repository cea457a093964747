//! Error types for storage operations

use std::fmt;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug)]
pub enum StorageError {
    /// Database connection failed
    ConnectionFailed(String),

    /// Invalid configuration
    InvalidConfig(String),

    /// A metric or label name is unusable as an identifier after sanitization
    InvalidIdentifier(String),

    /// Table or index creation failed
    SchemaFailed(String),

    /// Row insertion failed (the transaction was rolled back)
    InsertFailed(String),

    /// Deleting expired rows failed for one or more tables
    RetentionFailed(String),

    /// A catalog query (listing tables) failed
    QueryFailed(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed(msg) => {
                write!(f, "failed to connect to storage backend: {}", msg)
            }
            StorageError::InvalidConfig(msg) => write!(f, "invalid storage configuration: {}", msg),
            StorageError::InvalidIdentifier(msg) => write!(f, "invalid identifier: {}", msg),
            StorageError::SchemaFailed(msg) => write!(f, "schema creation failed: {}", msg),
            StorageError::InsertFailed(msg) => write!(f, "insert failed: {}", msg),
            StorageError::RetentionFailed(msg) => write!(f, "retention sweep failed: {}", msg),
            StorageError::QueryFailed(msg) => write!(f, "storage query failed: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

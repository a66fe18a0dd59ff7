//! Library-wide error types
//!
//! This module defines a centralized error type using `thiserror` for
//! clean error handling across the capture, storage and export layers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Library-wide error type
///
/// Variants carry a rendered message rather than the source error so the
/// type stays `Clone` and serializable. Callers at an API boundary log the
/// message and return a generic description instead.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum AppError {
    /// Storage/database error
    #[error("Storage error: {0}")]
    StorageError(String),

    /// The store could not be brought to the expected schema
    #[error("Schema migration failed: {0}")]
    MigrationError(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Caller supplied query parameters that cannot be interpreted
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        Self::StorageError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Other(format!("Background task failed: {err}"))
    }
}

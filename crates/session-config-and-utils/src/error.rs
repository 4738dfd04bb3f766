//! Core error types.

use thiserror::Error;

/// Errors raised while resolving configuration, identity or paths.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Path error (e.g., home directory not found)
    #[error("Path error: {0}")]
    Path(String),

    /// The application identity is missing or malformed
    #[error("Invalid app identity: {0}")]
    InvalidIdentity(String),
}

/// Result type alias using CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

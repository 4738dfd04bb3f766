//! DPoP key lifecycle.
//!
//! One asymmetric key per application session: generated on first use,
//! cached for the life of the process, persisted in the session store, and
//! dropped only on logout. Token refreshes never rotate it.

mod jwk;
mod manager;

pub use jwk::{DpopAlgorithm, DpopJwk};
pub use manager::{DpopKeyManager, KeyState};

use thiserror::Error;

/// Errors from the key lifecycle.
#[derive(Error, Debug)]
pub enum KeyLifecycleError {
    /// `get` was called before any key was created
    #[error("No DPoP key exists; call get_or_create first")]
    NoKey,

    /// Key generation failed
    #[error("Key generation failed: {0}")]
    Generation(String),

    /// The stored key could not be parsed
    #[error("Stored DPoP key is invalid: {0}")]
    InvalidKey(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for key lifecycle operations.
pub type KeyResult<T> = Result<T, KeyLifecycleError>;

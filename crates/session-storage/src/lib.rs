//! Durable session storage.
//!
//! - [`SecureStorage`]: narrow key/value vault interface with batched commits
//! - [`FileVault`]: per-application vault file shared by every process of the app
//! - [`MemoryStorage`]: in-process backend for tests and ephemeral sessions
//! - [`TokenStore`]: the session store (tokens, expiry, DPoP key) built on top

mod keys;
mod memory;
mod token_store;
mod traits;
mod vault;

pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use token_store::{DebugEntry, StorageDebugInfo, TokenSet, TokenStore, SKEW_BUFFER_SECS};
pub use traits::{SecureStorage, WriteBatch, WriteOp};
pub use vault::FileVault;

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The vault file could not be parsed
    #[error("Vault corrupted: {0}")]
    Corrupt(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Sealing or unsealing failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// The caller tried to store something that is not a session
    #[error("Invalid tokens: {0}")]
    InvalidTokens(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

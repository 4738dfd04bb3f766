//! Authentication orchestration.
//!
//! The OIDC handshake itself belongs to an [`OidcProvider`]; this crate hands
//! it the DPoP key and a [`Browser`], then funnels the resulting tokens into
//! the session store. Logout is the only path that drops the DPoP key.

mod config;
mod orchestrator;
mod provider;

pub use config::{SsoConfiguration, DEFAULT_SCOPE};
pub use orchestrator::AuthOrchestrator;
pub use provider::{
    Browser, BrowserOptions, BrowserResult, LoginRequest, LogoutRequest, OidcProvider,
    ProviderError, ProviderTokens, RefreshRequest,
};

use dpop_key_manager::KeyLifecycleError;
use session_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid SSO configuration: {0}")]
    InvalidConfiguration(String),

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("{0}")]
    Provider(#[from] ProviderError),

    #[error("DPoP key error: {0}")]
    KeyLifecycle(#[from] KeyLifecycleError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type AuthResult<T> = Result<T, AuthError>;

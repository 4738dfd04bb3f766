//! Collaborators supplied by the host application.

use crate::SsoConfiguration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dpop_key_manager::DpopJwk;
use session_storage::TokenSet;
use thiserror::Error;
use url::Url;

/// An error reported by the identity provider (`error`, `error_description`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Provider error: {error}")]
pub struct ProviderError {
    pub error: String,
    pub description: Option<String>,
}

impl ProviderError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Token material from a successful login or refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<ProviderTokens> for TokenSet {
    fn from(tokens: ProviderTokens) -> Self {
        TokenSet {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            id_token: tokens.id_token,
            expires_at: tokens.expires_at,
        }
    }
}

pub struct BrowserOptions {
    pub start_url: Url,
    /// Redirect URL that ends the browser leg.
    pub end_url: Url,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserResult {
    /// Full callback URL, query included.
    Success { response_url: String },
    UserCancel,
    UnknownError(String),
}

/// Launches the system browser for the interactive leg of a flow.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn invoke(&self, options: BrowserOptions) -> BrowserResult;
}

pub struct LoginRequest<'a> {
    pub config: &'a SsoConfiguration,
    pub browser: &'a dyn Browser,
    /// Key every token request must be bound to.
    pub dpop_key: Option<&'a DpopJwk>,
}

pub struct RefreshRequest<'a> {
    pub config: &'a SsoConfiguration,
    pub refresh_token: &'a str,
    pub dpop_key: Option<&'a DpopJwk>,
}

pub struct LogoutRequest<'a> {
    pub config: &'a SsoConfiguration,
    pub browser: &'a dyn Browser,
    pub id_token_hint: Option<&'a str>,
}

/// The external OIDC protocol implementation.
#[async_trait]
pub trait OidcProvider: Send + Sync {
    async fn login(&self, request: LoginRequest<'_>) -> Result<ProviderTokens, ProviderError>;

    async fn refresh(&self, request: RefreshRequest<'_>) -> Result<ProviderTokens, ProviderError>;

    async fn end_session(&self, request: LogoutRequest<'_>) -> Result<(), ProviderError>;
}

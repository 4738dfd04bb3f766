//! SSO client configuration.

use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_SCOPE: &str = "openid profile email offline_access";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsoConfiguration {
    /// Issuer base URL.
    pub authority: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub scope: String,
    pub redirect_uri: String,
    pub post_logout_redirect_uri: Option<String>,
    /// Bind tokens to a DPoP key.
    pub enable_dpop: bool,
    /// Serve the session to other processes through the session service.
    pub enable_session_service: bool,
}

impl Default for SsoConfiguration {
    fn default() -> Self {
        Self {
            authority: String::new(),
            client_id: String::new(),
            client_secret: None,
            scope: DEFAULT_SCOPE.to_string(),
            redirect_uri: String::new(),
            post_logout_redirect_uri: None,
            enable_dpop: true,
            enable_session_service: true,
        }
    }
}

impl SsoConfiguration {
    pub fn new(
        authority: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            authority: authority.into(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            ..Self::default()
        }
    }

    /// Authority, client id and redirect URI are all non-blank.
    pub fn is_valid(&self) -> bool {
        !self.authority.trim().is_empty()
            && !self.client_id.trim().is_empty()
            && !self.redirect_uri.trim().is_empty()
    }

    pub fn authority_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(self.authority.trim())
    }
}

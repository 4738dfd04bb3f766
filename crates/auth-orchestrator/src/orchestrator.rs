//! Login, refresh and logout.

use crate::{
    AuthError, AuthResult, Browser, LoginRequest, LogoutRequest, OidcProvider, RefreshRequest,
    SsoConfiguration,
};
use dpop_key_manager::{DpopJwk, DpopKeyManager};
use session_storage::TokenStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct AuthOrchestrator {
    config: SsoConfiguration,
    store: Arc<TokenStore>,
    keys: Arc<DpopKeyManager>,
    provider: Arc<dyn OidcProvider>,
    browser: Arc<dyn Browser>,
}

impl AuthOrchestrator {
    /// Fails with [`AuthError::InvalidConfiguration`] unless the configuration
    /// is valid and its authority parses as a URL.
    pub fn new(
        config: SsoConfiguration,
        store: Arc<TokenStore>,
        keys: Arc<DpopKeyManager>,
        provider: Arc<dyn OidcProvider>,
        browser: Arc<dyn Browser>,
    ) -> AuthResult<Self> {
        if !config.is_valid() {
            return Err(AuthError::InvalidConfiguration(
                "authority, client_id and redirect_uri are required".to_string(),
            ));
        }
        config
            .authority_url()
            .map_err(|e| AuthError::InvalidConfiguration(format!("authority: {}", e)))?;

        info!(
            authority = %config.authority,
            client_id = %config.client_id,
            dpop = config.enable_dpop,
            "Auth orchestrator ready"
        );
        Ok(Self {
            config,
            store,
            keys,
            provider,
            browser,
        })
    }

    pub fn config(&self) -> &SsoConfiguration {
        &self.config
    }

    /// The key token requests are bound to, if DPoP is on.
    async fn binding_key(&self) -> AuthResult<Option<DpopJwk>> {
        if !self.config.enable_dpop {
            return Ok(None);
        }
        Ok(Some(self.keys.get_or_create().await?))
    }

    /// Run the interactive login and persist the result. Returns the access token.
    pub async fn login(&self) -> AuthResult<String> {
        let key = self.binding_key().await?;
        let tokens = self
            .provider
            .login(LoginRequest {
                config: &self.config,
                browser: self.browser.as_ref(),
                dpop_key: key.as_ref(),
            })
            .await
            .inspect_err(|e| warn!(error = %e.error, description = ?e.description, "Login failed"))?;

        let access_token = tokens.access_token.clone();
        self.store.save_tokens(&tokens.into())?;
        info!(access_token_len = access_token.len(), "Login complete");
        Ok(access_token)
    }

    /// Exchange the stored refresh token. The DPoP key stays the same.
    pub async fn refresh_tokens(&self) -> AuthResult<()> {
        let Some(refresh_token) = self.store.get_refresh_token() else {
            debug!("Refresh requested without a refresh token");
            return Err(AuthError::NoRefreshToken);
        };

        let key = self.binding_key().await?;
        let tokens = self
            .provider
            .refresh(RefreshRequest {
                config: &self.config,
                refresh_token: &refresh_token,
                dpop_key: key.as_ref(),
            })
            .await
            .inspect_err(|e| warn!(error = %e.error, description = ?e.description, "Refresh failed"))?;

        self.store.save_tokens(&tokens.into())?;
        info!("Token refresh complete");
        Ok(())
    }

    /// End the provider session, then drop every token and the DPoP key.
    ///
    /// Provider failures are logged; the local session is cleared regardless.
    pub async fn logout(&self) -> AuthResult<()> {
        if let Some(id_token) = self.store.get_id_token() {
            let ended = self
                .provider
                .end_session(LogoutRequest {
                    config: &self.config,
                    browser: self.browser.as_ref(),
                    id_token_hint: Some(&id_token),
                })
                .await;
            if let Err(e) = ended {
                warn!(error = %e.error, "Provider logout failed; clearing local session anyway");
            }
        }

        let cleared = self.store.clear_tokens();
        self.keys.reset();
        cleared?;
        info!("Logout complete");
        Ok(())
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    pub fn access_token(&self) -> Option<String> {
        self.store.get_access_token()
    }

    /// The session's DPoP key, created on first use.
    pub async fn dpop_key(&self) -> AuthResult<DpopJwk> {
        Ok(self.keys.get_or_create().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BrowserOptions, BrowserResult, ProviderError, ProviderTokens};
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use parking_lot::Mutex;
    use session_storage::MemoryStorage;

    #[derive(Default)]
    struct MockProvider {
        fail_login: bool,
        fail_end_session: bool,
        login_keys: Mutex<Vec<Option<String>>>,
        refreshes: Mutex<Vec<(String, Option<String>)>>,
        end_sessions: Mutex<Vec<Option<String>>>,
    }

    fn tokens(access: &str, refresh: Option<&str>, id: Option<&str>) -> ProviderTokens {
        ProviderTokens {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_owned),
            id_token: id.map(str::to_owned),
            expires_at: Some(Utc::now() + Duration::hours(1)),
        }
    }

    #[async_trait]
    impl OidcProvider for MockProvider {
        async fn login(&self, request: LoginRequest<'_>) -> Result<ProviderTokens, ProviderError> {
            self.login_keys
                .lock()
                .push(request.dpop_key.map(|k| k.thumbprint()));
            if self.fail_login {
                return Err(ProviderError::new("access_denied").with_description("user declined"));
            }
            Ok(tokens("A1", Some("R1"), Some("I1")))
        }

        async fn refresh(&self, request: RefreshRequest<'_>) -> Result<ProviderTokens, ProviderError> {
            self.refreshes.lock().push((
                request.refresh_token.to_string(),
                request.dpop_key.map(|k| k.thumbprint()),
            ));
            // No rotation: the stored refresh token must survive.
            Ok(tokens("A2", None, None))
        }

        async fn end_session(&self, request: LogoutRequest<'_>) -> Result<(), ProviderError> {
            self.end_sessions
                .lock()
                .push(request.id_token_hint.map(str::to_owned));
            if self.fail_end_session {
                return Err(ProviderError::new("server_error"));
            }
            Ok(())
        }
    }

    struct CancellingBrowser;

    #[async_trait]
    impl Browser for CancellingBrowser {
        async fn invoke(&self, _options: BrowserOptions) -> BrowserResult {
            BrowserResult::UserCancel
        }
    }

    fn valid_config() -> SsoConfiguration {
        SsoConfiguration::new("https://id.example.com", "notes", "notes://callback")
    }

    struct Harness {
        auth: AuthOrchestrator,
        provider: Arc<MockProvider>,
        store: Arc<TokenStore>,
        keys: Arc<DpopKeyManager>,
    }

    fn harness_with(config: SsoConfiguration, provider: MockProvider) -> Harness {
        let store = Arc::new(TokenStore::new(Box::new(MemoryStorage::new())));
        let keys = Arc::new(DpopKeyManager::new(store.clone()));
        let provider = Arc::new(provider);
        let auth = AuthOrchestrator::new(
            config,
            store.clone(),
            keys.clone(),
            provider.clone(),
            Arc::new(CancellingBrowser),
        )
        .unwrap();
        Harness {
            auth,
            provider,
            store,
            keys,
        }
    }

    fn harness() -> Harness {
        harness_with(valid_config(), MockProvider::default())
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        let store = Arc::new(TokenStore::new(Box::new(MemoryStorage::new())));
        let keys = Arc::new(DpopKeyManager::new(store.clone()));

        for config in [
            SsoConfiguration::default(),
            SsoConfiguration::new("not a url", "notes", "notes://callback"),
        ] {
            let result = AuthOrchestrator::new(
                config,
                store.clone(),
                keys.clone(),
                Arc::new(MockProvider::default()),
                Arc::new(CancellingBrowser),
            );
            assert!(matches!(result, Err(AuthError::InvalidConfiguration(_))));
        }
    }

    #[tokio::test]
    async fn test_login_binds_key_and_saves_tokens() {
        let h = harness();

        let access = h.auth.login().await.unwrap();

        assert_eq!(access, "A1");
        assert!(h.auth.is_authenticated());
        assert_eq!(h.auth.access_token().as_deref(), Some("A1"));
        assert_eq!(h.store.get_refresh_token().as_deref(), Some("R1"));
        let thumbprint = h.keys.get().unwrap().thumbprint();
        assert_eq!(*h.provider.login_keys.lock(), vec![Some(thumbprint)]);
    }

    #[tokio::test]
    async fn test_login_without_dpop_creates_no_key() {
        let config = SsoConfiguration {
            enable_dpop: false,
            ..valid_config()
        };
        let h = harness_with(config, MockProvider::default());

        h.auth.login().await.unwrap();

        assert_eq!(*h.provider.login_keys.lock(), vec![None]);
        assert!(!h.keys.has_key());
    }

    #[tokio::test]
    async fn test_provider_error_leaves_store_untouched() {
        let h = harness_with(
            valid_config(),
            MockProvider {
                fail_login: true,
                ..MockProvider::default()
            },
        );

        let err = h.auth.login().await.unwrap_err();

        match err {
            AuthError::Provider(e) => {
                assert_eq!(e.error, "access_denied");
                assert_eq!(e.description.as_deref(), Some("user declined"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!h.auth.is_authenticated());
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_fails() {
        let h = harness();
        assert!(matches!(
            h.auth.refresh_tokens().await,
            Err(AuthError::NoRefreshToken)
        ));
        assert!(h.provider.refreshes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_keeps_key_and_refresh_token() {
        let h = harness();
        h.auth.login().await.unwrap();
        let thumbprint = h.auth.dpop_key().await.unwrap().thumbprint();

        h.auth.refresh_tokens().await.unwrap();

        assert_eq!(
            *h.provider.refreshes.lock(),
            vec![("R1".to_string(), Some(thumbprint.clone()))]
        );
        assert_eq!(h.auth.access_token().as_deref(), Some("A2"));
        assert_eq!(h.store.get_refresh_token().as_deref(), Some("R1"));
        assert_eq!(h.auth.dpop_key().await.unwrap().thumbprint(), thumbprint);
    }

    #[tokio::test]
    async fn test_logout_ends_session_and_drops_key() {
        let h = harness();
        h.auth.login().await.unwrap();
        let before = h.auth.dpop_key().await.unwrap().thumbprint();

        h.auth.logout().await.unwrap();

        assert_eq!(*h.provider.end_sessions.lock(), vec![Some("I1".to_string())]);
        assert!(!h.auth.is_authenticated());
        assert_eq!(h.auth.access_token(), None);
        assert!(!h.keys.has_key());
        assert_eq!(h.store.get_dpop_jwk(), None);

        let after = h.auth.dpop_key().await.unwrap().thumbprint();
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn test_logout_survives_provider_failure() {
        let h = harness_with(
            valid_config(),
            MockProvider {
                fail_end_session: true,
                ..MockProvider::default()
            },
        );
        h.auth.login().await.unwrap();

        h.auth.logout().await.unwrap();

        assert!(!h.auth.is_authenticated());
        assert!(!h.keys.has_key());
    }

    #[tokio::test]
    async fn test_logout_without_id_token_skips_provider() {
        let h = harness();
        h.auth.logout().await.unwrap();
        assert!(h.provider.end_sessions.lock().is_empty());
    }
}

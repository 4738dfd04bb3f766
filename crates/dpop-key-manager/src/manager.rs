//! Key manager: cache, store, single-flight creation.

use crate::{DpopAlgorithm, DpopJwk, KeyLifecycleError, KeyResult};
use parking_lot::RwLock;
use session_storage::TokenStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Where the key currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    NoKey,
    /// Held in this process.
    Cached,
    /// Persisted but not yet loaded by this process.
    Stored,
}

pub struct DpopKeyManager {
    store: Arc<TokenStore>,
    algorithm: DpopAlgorithm,
    cache: RwLock<Option<DpopJwk>>,
    /// Serializes the read-miss, generate, store sequence.
    creation: Mutex<()>,
}

impl DpopKeyManager {
    pub fn new(store: Arc<TokenStore>) -> Self {
        Self::with_algorithm(store, DpopAlgorithm::default())
    }

    pub fn with_algorithm(store: Arc<TokenStore>, algorithm: DpopAlgorithm) -> Self {
        Self {
            store,
            algorithm,
            cache: RwLock::new(None),
            creation: Mutex::new(()),
        }
    }

    pub fn algorithm(&self) -> DpopAlgorithm {
        self.algorithm
    }

    fn cached(&self) -> Option<DpopJwk> {
        self.cache.read().clone()
    }

    /// Parse the stored key. An unparsable blob reads as `Err`.
    fn load_stored(&self) -> Option<KeyResult<DpopJwk>> {
        self.store.get_dpop_jwk().map(|json| DpopJwk::from_json(&json))
    }

    /// Return the key, creating and persisting one on first use.
    pub async fn get_or_create(&self) -> KeyResult<DpopJwk> {
        if let Some(jwk) = self.cached() {
            return Ok(jwk);
        }

        let _guard = self.creation.lock().await;

        // Another caller may have finished while we waited.
        if let Some(jwk) = self.cached() {
            return Ok(jwk);
        }

        // Vault access waits on a cross-process file lock.
        let store = self.store.clone();
        let stored = tokio::task::spawn_blocking(move || store.get_dpop_jwk())
            .await
            .map_err(|e| KeyLifecycleError::Generation(e.to_string()))?;

        match stored.map(|json| DpopJwk::from_json(&json)) {
            Some(Ok(jwk)) => {
                debug!(thumbprint = %jwk.thumbprint(), "Loaded DPoP key from store");
                *self.cache.write() = Some(jwk.clone());
                return Ok(jwk);
            }
            Some(Err(e)) => {
                warn!(error = %e, "Stored DPoP key is unusable, generating a new one");
            }
            None => {}
        }

        let algorithm = self.algorithm;
        let jwk = tokio::task::spawn_blocking(move || DpopJwk::generate(algorithm))
            .await
            .map_err(|e| KeyLifecycleError::Generation(e.to_string()))??;

        *self.cache.write() = Some(jwk.clone());

        let store = self.store.clone();
        let persisted = match jwk.to_json() {
            Ok(json) => tokio::task::spawn_blocking(move || store.save_dpop_jwk(&json))
                .await
                .map_err(|e| e.to_string())
                .and_then(|saved| saved.map_err(|e| e.to_string())),
            Err(e) => Err(e.to_string()),
        };
        match persisted {
            Ok(()) => info!(alg = %algorithm, thumbprint = %jwk.thumbprint(), "Created DPoP key"),
            Err(e) => warn!(
                alg = %algorithm,
                error = %e,
                "Created DPoP key but could not persist it; keeping it in memory"
            ),
        }

        Ok(jwk)
    }

    /// Return the existing key without creating one.
    pub fn get(&self) -> KeyResult<DpopJwk> {
        if let Some(jwk) = self.cached() {
            return Ok(jwk);
        }

        match self.load_stored() {
            Some(Ok(jwk)) => {
                *self.cache.write() = Some(jwk.clone());
                Ok(jwk)
            }
            Some(Err(e)) => Err(e),
            None => Err(KeyLifecycleError::NoKey),
        }
    }

    /// Drop the in-memory key. The persisted copy is removed by
    /// `TokenStore::clear_tokens`.
    pub fn reset(&self) {
        *self.cache.write() = None;
        debug!("DPoP key cache reset");
    }

    /// Whether this process holds the key in memory.
    pub fn has_key(&self) -> bool {
        self.cache.read().is_some()
    }

    pub fn state(&self) -> KeyState {
        if self.has_key() {
            KeyState::Cached
        } else if self.store.get_dpop_jwk().is_some() {
            KeyState::Stored
        } else {
            KeyState::NoKey
        }
    }
}

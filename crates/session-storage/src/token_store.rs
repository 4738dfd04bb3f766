//! Session token store.

use crate::{FileVault, SecureStorage, StorageError, StorageKeys, StorageResult, WriteBatch};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use session_config_and_utils::{AppIdentity, Paths};
use std::fmt;
use tracing::{debug, info, warn};

/// Margin subtracted from the expiry before a session counts as expired.
pub const SKEW_BUFFER_SECS: i64 = 300;

/// Token material returned by a login or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    /// `None` keeps the previously stored refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// `None` keeps the previously stored id token.
    #[serde(default)]
    pub id_token: Option<String>,
    /// `None` means the expiry is unknown.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenSet {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            id_token: None,
            expires_at: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_id_token(mut self, id_token: impl Into<String>) -> Self {
        self.id_token = Some(id_token.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Expiry `seconds` from now.
    pub fn expiring_in(self, seconds: i64) -> Self {
        self.with_expires_at(Utc::now() + Duration::seconds(seconds))
    }
}

/// One row of [`StorageDebugInfo`]. Never carries the value itself.
#[derive(Debug, Clone, Serialize)]
pub struct DebugEntry {
    pub key: &'static str,
    pub present: bool,
    pub length: usize,
    pub readable: bool,
}

/// Redacted view of the vault for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct StorageDebugInfo {
    pub entries: Vec<DebugEntry>,
    pub expires_at: Option<DateTime<Utc>>,
    pub authenticated: bool,
}

impl fmt::Display for StorageDebugInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            let status = match (entry.readable, entry.present) {
                (false, _) => "unreadable".to_string(),
                (true, true) => format!("present ({} bytes)", entry.length),
                (true, false) => "absent".to_string(),
            };
            writeln!(f, "{:<14} {}", entry.key, status)?;
        }
        match self.expires_at {
            Some(at) => writeln!(f, "{:<14} {}", "expiry", at.to_rfc3339())?,
            None => writeln!(f, "{:<14} unknown", "expiry")?,
        }
        write!(f, "{:<14} {}", "authenticated", self.authenticated)
    }
}

/// Durable per-application session: tokens, expiry and the DPoP key.
///
/// Getters never fail. A storage error on one key is logged and reported as
/// "no value" without affecting the other keys.
pub struct TokenStore {
    storage: Box<dyn SecureStorage>,
}

impl TokenStore {
    pub fn new(storage: Box<dyn SecureStorage>) -> Self {
        Self { storage }
    }

    /// Store backed by the application's vault file.
    pub fn open(paths: &Paths, identity: &AppIdentity, encrypt: bool) -> StorageResult<Self> {
        let vault = FileVault::open(paths, identity, encrypt)?;
        debug!(path = %vault.path().display(), encrypt, "Opened token store");
        Ok(Self::new(Box::new(vault)))
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.storage.get(key) {
            Ok(Some(value)) if !value.is_empty() => Some(value),
            Ok(_) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read session value");
                None
            }
        }
    }

    pub fn get_access_token(&self) -> Option<String> {
        self.read(StorageKeys::ACCESS_TOKEN)
    }

    pub fn get_refresh_token(&self) -> Option<String> {
        self.read(StorageKeys::REFRESH_TOKEN)
    }

    pub fn get_id_token(&self) -> Option<String> {
        self.read(StorageKeys::ID_TOKEN)
    }

    /// Parsed expiry, if one is stored and parses.
    pub fn get_expires_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.read(StorageKeys::EXPIRES_AT)?;
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(at) => Some(at.with_timezone(&Utc)),
            Err(e) => {
                warn!(error = %e, "Stored expiry is not RFC 3339, treating as unknown");
                None
            }
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated_at(Utc::now())
    }

    /// Authenticated iff an access token exists and `now` is before the expiry
    /// minus [`SKEW_BUFFER_SECS`]. Unknown expiry counts as valid.
    pub fn is_authenticated_at(&self, now: DateTime<Utc>) -> bool {
        if self.get_access_token().is_none() {
            return false;
        }
        match self.get_expires_at() {
            Some(expires_at) => now < expires_at - Duration::seconds(SKEW_BUFFER_SECS),
            None => true,
        }
    }

    /// Persist a token set in one commit.
    ///
    /// The expiry is removed first and written last so that a backend that
    /// applies the batch op by op never exposes a new access token next to a
    /// stale expiry.
    pub fn save_tokens(&self, tokens: &TokenSet) -> StorageResult<()> {
        if tokens.access_token.is_empty() {
            return Err(StorageError::InvalidTokens(
                "access token must not be empty".to_string(),
            ));
        }

        let mut batch = WriteBatch::new();
        batch
            .delete(StorageKeys::EXPIRES_AT)
            .set(StorageKeys::ACCESS_TOKEN, &tokens.access_token);

        if let Some(refresh) = tokens.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            batch.set(StorageKeys::REFRESH_TOKEN, refresh);
        }
        if let Some(id) = tokens.id_token.as_deref().filter(|t| !t.is_empty()) {
            batch.set(StorageKeys::ID_TOKEN, id);
        }
        if let Some(expires_at) = tokens.expires_at {
            batch.set(
                StorageKeys::EXPIRES_AT,
                &expires_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            );
        }

        self.storage.commit(&batch)?;
        info!(
            access_token_len = tokens.access_token.len(),
            has_refresh = tokens.refresh_token.is_some(),
            has_id = tokens.id_token.is_some(),
            expires_at = ?tokens.expires_at,
            "Saved session tokens"
        );
        Ok(())
    }

    /// Remove every session key, the DPoP key included. Idempotent.
    pub fn clear_tokens(&self) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        for key in StorageKeys::ALL {
            batch.delete(key);
        }
        self.storage.commit(&batch)?;
        info!("Cleared session tokens");
        Ok(())
    }

    pub fn get_dpop_jwk(&self) -> Option<String> {
        self.read(StorageKeys::DPOP_JWK)
    }

    pub fn save_dpop_jwk(&self, jwk: &str) -> StorageResult<()> {
        self.storage.set(StorageKeys::DPOP_JWK, jwk)
    }

    /// Remove only the DPoP key.
    pub fn clear_dpop_jwk(&self) -> StorageResult<()> {
        self.storage.delete(StorageKeys::DPOP_JWK)?;
        Ok(())
    }

    pub fn debug_snapshot(&self) -> StorageDebugInfo {
        let entries = StorageKeys::ALL
            .into_iter()
            .map(|key| match self.storage.get(key) {
                Ok(value) => DebugEntry {
                    key,
                    present: value.as_deref().is_some_and(|v| !v.is_empty()),
                    length: value.map(|v| v.len()).unwrap_or(0),
                    readable: true,
                },
                Err(_) => DebugEntry {
                    key,
                    present: false,
                    length: 0,
                    readable: false,
                },
            })
            .collect();

        StorageDebugInfo {
            entries,
            expires_at: self.get_expires_at(),
            authenticated: self.is_authenticated(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn memory_store() -> TokenStore {
        TokenStore::new(Box::new(MemoryStorage::new()))
    }

    /// Storage whose reads of selected keys fail.
    #[derive(Default)]
    struct FailingStorage {
        data: Mutex<HashMap<String, String>>,
        broken: Vec<&'static str>,
    }

    impl SecureStorage for FailingStorage {
        fn set(&self, key: &str, value: &str) -> StorageResult<()> {
            self.data.lock().insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn get(&self, key: &str) -> StorageResult<Option<String>> {
            if self.broken.contains(&key) {
                return Err(StorageError::Crypto(format!("{}: authentication failed", key)));
            }
            Ok(self.data.lock().get(key).cloned())
        }

        fn delete(&self, key: &str) -> StorageResult<bool> {
            Ok(self.data.lock().remove(key).is_some())
        }

        fn keys(&self) -> StorageResult<Vec<String>> {
            Ok(self.data.lock().keys().cloned().collect())
        }
    }

    #[test]
    fn test_save_then_read_back() {
        let store = memory_store();
        let tokens = TokenSet::new("A1")
            .with_refresh_token("R1")
            .with_id_token("I1")
            .expiring_in(3600);

        store.save_tokens(&tokens).unwrap();

        assert_eq!(store.get_access_token(), Some("A1".to_string()));
        assert_eq!(store.get_refresh_token(), Some("R1".to_string()));
        assert_eq!(store.get_id_token(), Some("I1".to_string()));
        assert!(store.is_authenticated());
    }

    #[test]
    fn test_skew_buffer_boundary() {
        let store = memory_store();
        let expires_at = Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap();
        store
            .save_tokens(&TokenSet::new("A1").with_expires_at(expires_at))
            .unwrap();

        let edge = expires_at - Duration::seconds(SKEW_BUFFER_SECS);
        assert!(store.is_authenticated_at(edge - Duration::seconds(1)));
        assert!(!store.is_authenticated_at(edge));
        assert!(!store.is_authenticated_at(edge + Duration::seconds(1)));
    }

    #[test]
    fn test_clear_tokens_unauthenticates() {
        let store = memory_store();
        store
            .save_tokens(&TokenSet::new("A1").with_refresh_token("R1").expiring_in(3600))
            .unwrap();
        store.save_dpop_jwk("{\"kty\":\"EC\"}").unwrap();

        store.clear_tokens().unwrap();
        store.clear_tokens().unwrap();

        assert!(!store.is_authenticated());
        assert_eq!(store.get_access_token(), None);
        assert_eq!(store.get_refresh_token(), None);
        assert_eq!(store.get_dpop_jwk(), None);
    }

    #[test]
    fn test_missing_expiry_is_authenticated() {
        let store = memory_store();
        store.save_tokens(&TokenSet::new("A1")).unwrap();
        assert!(store.is_authenticated());
    }

    #[test]
    fn test_unparsable_expiry_is_treated_as_unknown() {
        let storage = MemoryStorage::new();
        storage.set(StorageKeys::ACCESS_TOKEN, "A1").unwrap();
        storage.set(StorageKeys::EXPIRES_AT, "next tuesday").unwrap();
        let store = TokenStore::new(Box::new(storage));

        assert_eq!(store.get_expires_at(), None);
        assert!(store.is_authenticated());
    }

    #[test]
    fn test_no_access_token_is_unauthenticated() {
        let storage = MemoryStorage::new();
        storage.set(StorageKeys::REFRESH_TOKEN, "R1").unwrap();
        storage.set(StorageKeys::ACCESS_TOKEN, "").unwrap();
        let store = TokenStore::new(Box::new(storage));

        assert!(!store.is_authenticated());
        assert_eq!(store.get_access_token(), None);
    }

    #[test]
    fn test_refresh_without_new_refresh_token_keeps_old_one() {
        let store = memory_store();
        store
            .save_tokens(&TokenSet::new("A1").with_refresh_token("R1").with_id_token("I1").expiring_in(60))
            .unwrap();

        store.save_tokens(&TokenSet::new("A2")).unwrap();

        assert_eq!(store.get_access_token(), Some("A2".to_string()));
        assert_eq!(store.get_refresh_token(), Some("R1".to_string()));
        assert_eq!(store.get_id_token(), Some("I1".to_string()));
        assert_eq!(store.get_expires_at(), None);
    }

    #[test]
    fn test_save_rejects_empty_access_token() {
        let store = memory_store();
        let result = store.save_tokens(&TokenSet::new(""));
        assert!(matches!(result, Err(StorageError::InvalidTokens(_))));
    }

    #[test]
    fn test_save_tokens_keeps_dpop_key() {
        let store = memory_store();
        store.save_dpop_jwk("{\"kty\":\"EC\"}").unwrap();
        store.save_tokens(&TokenSet::new("A1").expiring_in(60)).unwrap();
        store.save_tokens(&TokenSet::new("A2").expiring_in(60)).unwrap();

        assert_eq!(store.get_dpop_jwk(), Some("{\"kty\":\"EC\"}".to_string()));
    }

    #[test]
    fn test_failed_read_isolated_to_its_key() {
        let storage = FailingStorage {
            broken: vec![StorageKeys::ID_TOKEN],
            ..Default::default()
        };
        let store = TokenStore::new(Box::new(storage));
        store
            .save_tokens(&TokenSet::new("A1").with_id_token("I1").expiring_in(3600))
            .unwrap();

        assert_eq!(store.get_id_token(), None);
        assert_eq!(store.get_access_token(), Some("A1".to_string()));
        assert!(store.is_authenticated());
    }

    #[test]
    fn test_debug_snapshot_never_contains_values() {
        let storage = FailingStorage {
            broken: vec![StorageKeys::DPOP_JWK],
            ..Default::default()
        };
        let store = TokenStore::new(Box::new(storage));
        store
            .save_tokens(&TokenSet::new("secret-access").with_refresh_token("secret-refresh"))
            .unwrap();

        let snapshot = store.debug_snapshot();
        let access = snapshot
            .entries
            .iter()
            .find(|e| e.key == StorageKeys::ACCESS_TOKEN)
            .unwrap();
        assert!(access.present);
        assert_eq!(access.length, "secret-access".len());

        let dpop = snapshot
            .entries
            .iter()
            .find(|e| e.key == StorageKeys::DPOP_JWK)
            .unwrap();
        assert!(!dpop.readable);

        let rendered = snapshot.to_string();
        assert!(!rendered.contains("secret-access"));
        assert!(!rendered.contains("secret-refresh"));
        assert!(rendered.contains("unreadable"));
    }

    #[test]
    fn test_end_to_end_on_vault_file() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        let identity = AppIdentity::new("com.example.app").unwrap();
        let store = TokenStore::open(&paths, &identity, true).unwrap();

        assert!(!store.is_authenticated());
        store
            .save_tokens(
                &TokenSet::new("A1")
                    .with_refresh_token("R1")
                    .with_id_token("I1")
                    .expiring_in(3600),
            )
            .unwrap();

        let other_process = TokenStore::open(&paths, &identity, true).unwrap();
        assert!(other_process.is_authenticated());
        assert_eq!(other_process.get_access_token(), Some("A1".to_string()));

        other_process.clear_tokens().unwrap();
        assert!(!store.is_authenticated());
        assert_eq!(store.get_access_token(), None);
    }

    #[test]
    fn test_logout_and_login_recover_from_corrupt_vault() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        let identity = AppIdentity::new("com.example.app").unwrap();
        let store = TokenStore::open(&paths, &identity, true).unwrap();
        store.save_tokens(&TokenSet::new("A1").expiring_in(3600)).unwrap();
        std::fs::write(paths.vault_file(), "{ truncated").unwrap();

        assert_eq!(store.get_access_token(), None);
        store.clear_tokens().unwrap();
        assert!(!store.is_authenticated());

        store.save_tokens(&TokenSet::new("A2").expiring_in(3600)).unwrap();
        assert_eq!(store.get_access_token(), Some("A2".to_string()));
    }
}

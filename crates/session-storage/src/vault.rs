//! File-backed vault shared by every process of one application.
//!
//! Layout of `vault.json`:
//!
//! ```text
//! {"version":1,"entries":{"access_token":{"sealed":true,"value":"<b64(nonce||ciphertext)>"}}}
//! ```
//!
//! - Reads take a shared `flock` on `vault.lock`; commits take it exclusively,
//!   rewrite the whole file to a temp sibling and rename it into place, so a
//!   reader in another process never observes a half-applied batch.
//! - Each value is sealed on its own (ChaCha20-Poly1305, fresh nonce, key name
//!   as associated data). A damaged entry only fails its own read.

use crate::{SecureStorage, StorageError, StorageResult, WriteBatch, WriteOp};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use fs2::FileExt;
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use session_config_and_utils::{AppIdentity, Paths};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const VAULT_VERSION: u32 = 1;
const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

#[derive(Debug, Default, Serialize, Deserialize)]
struct VaultDocument {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, VaultEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VaultEntry {
    sealed: bool,
    value: String,
}

struct Sealer {
    cipher: ChaCha20Poly1305,
}

impl Sealer {
    fn from_key_material(ikm: &[u8], context: &str) -> StorageResult<Self> {
        let hk = Hkdf::<Sha256>::new(None, ikm);
        let mut okm = [0u8; KEY_SIZE];
        hk.expand(format!("session-vault:{}", context).as_bytes(), &mut okm)
            .map_err(|e| StorageError::Crypto(format!("HKDF expand failed: {}", e)))?;
        let cipher = ChaCha20Poly1305::new_from_slice(&okm)
            .map_err(|e| StorageError::Crypto(e.to_string()))?;
        Ok(Self { cipher })
    }

    fn seal(&self, key: &str, value: &str) -> StorageResult<String> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: value.as_bytes(),
                    aad: key.as_bytes(),
                },
            )
            .map_err(|e| StorageError::Crypto(format!("seal failed: {}", e)))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    fn open(&self, key: &str, sealed: &str) -> StorageResult<String> {
        let blob = BASE64
            .decode(sealed)
            .map_err(|e| StorageError::Encoding(format!("{}: {}", key, e)))?;
        if blob.len() <= NONCE_SIZE {
            return Err(StorageError::Crypto(format!("{}: sealed value too short", key)));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: key.as_bytes(),
                },
            )
            .map_err(|_| StorageError::Crypto(format!("{}: authentication failed", key)))?;

        String::from_utf8(plaintext).map_err(|e| StorageError::Encoding(format!("{}: {}", key, e)))
    }
}

/// Per-application vault file.
pub struct FileVault {
    path: PathBuf,
    lock_path: PathBuf,
    sealer: Option<Sealer>,
}

impl FileVault {
    /// Open the vault for an application, creating key material on first use.
    pub fn open(paths: &Paths, identity: &AppIdentity, encrypt: bool) -> StorageResult<Self> {
        if encrypt {
            Self::sealed(
                paths.vault_file(),
                paths.vault_lock_file(),
                &paths.vault_key_file(),
                identity.as_str(),
            )
        } else {
            Ok(Self::plaintext(paths.vault_file(), paths.vault_lock_file()))
        }
    }

    /// Vault that stores values unsealed.
    pub fn plaintext(path: PathBuf, lock_path: PathBuf) -> Self {
        Self {
            path,
            lock_path,
            sealer: None,
        }
    }

    /// Vault whose values are sealed with key material from `key_path`.
    pub fn sealed(
        path: PathBuf,
        lock_path: PathBuf,
        key_path: &Path,
        context: &str,
    ) -> StorageResult<Self> {
        let ikm = load_or_create_key(key_path)?;
        Ok(Self {
            path,
            lock_path,
            sealer: Some(Sealer::from_key_material(&ikm, context)?),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_file(&self) -> StorageResult<File> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .mode(0o600)
            .open(&self.lock_path)?;
        Ok(file)
    }

    fn read_document(&self) -> StorageResult<VaultDocument> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(VaultDocument::default()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(VaultDocument::default());
        }
        serde_json::from_str(&content)
            .map_err(|e| StorageError::Corrupt(format!("{}: {}", self.path.display(), e)))
    }

    fn load(&self) -> StorageResult<VaultDocument> {
        let lock = self.lock_file()?;
        FileExt::lock_shared(&lock)?;
        let document = self.read_document();
        FileExt::unlock(&lock)?;
        document
    }

    fn write_document(&self, document: &VaultDocument) -> StorageResult<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| StorageError::Corrupt("vault path has no parent".to_string()))?;
        std::fs::create_dir_all(parent)?;

        let tmp_path = self
            .path
            .with_extension(format!("json.tmp.{}", std::process::id()));
        let json = serde_json::to_vec_pretty(document)?;

        {
            let mut tmp = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .mode(0o600)
                .open(&tmp_path)?;
            tmp.write_all(&json)?;
            tmp.sync_all()?;
        }

        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        // Make the rename itself durable.
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
        Ok(())
    }

    /// Keep an unparsable vault next to the rebuilt one as `vault.json.corrupt`.
    /// Caller holds the exclusive lock.
    fn set_aside_corrupt_file(&self) {
        let aside = self.path.with_extension("json.corrupt");
        match std::fs::rename(&self.path, &aside) {
            Ok(()) => info!(path = %aside.display(), "Moved corrupt vault aside"),
            Err(e) => warn!(error = %e, "Could not move corrupt vault aside"),
        }
    }

    fn encode(&self, key: &str, value: &str) -> StorageResult<VaultEntry> {
        match &self.sealer {
            Some(sealer) => Ok(VaultEntry {
                sealed: true,
                value: sealer.seal(key, value)?,
            }),
            None => Ok(VaultEntry {
                sealed: false,
                value: value.to_string(),
            }),
        }
    }

    fn decode(&self, key: &str, entry: &VaultEntry) -> StorageResult<String> {
        match (entry.sealed, &self.sealer) {
            (false, _) => Ok(entry.value.clone()),
            (true, Some(sealer)) => sealer.open(key, &entry.value),
            (true, None) => Err(StorageError::Crypto(format!(
                "{}: entry is sealed but the vault was opened without a key",
                key
            ))),
        }
    }
}

impl SecureStorage for FileVault {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        batch.set(key, value);
        self.commit(&batch)
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let document = self.load()?;
        match document.entries.get(key) {
            Some(entry) => self.decode(key, entry).map(Some),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let existed = match self.load() {
            Ok(document) => document.entries.contains_key(key),
            Err(StorageError::Corrupt(_)) => false,
            Err(e) => return Err(e),
        };
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.commit(&batch)?;
        Ok(existed)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.load()?.entries.into_keys().collect())
    }

    fn commit(&self, batch: &WriteBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let lock = self.lock_file()?;
        FileExt::lock_exclusive(&lock)?;

        let result = (|| {
            let mut document = match self.read_document() {
                Err(StorageError::Corrupt(reason)) => {
                    warn!(reason = %reason, "Vault file is unreadable, rebuilding it");
                    self.set_aside_corrupt_file();
                    VaultDocument::default()
                }
                other => other?,
            };
            document.version = VAULT_VERSION;
            for op in batch.ops() {
                match op {
                    WriteOp::Set { key, value } => {
                        let entry = self.encode(key, value)?;
                        document.entries.insert(key.clone(), entry);
                    }
                    WriteOp::Delete { key } => {
                        document.entries.remove(key);
                    }
                }
            }
            self.write_document(&document)
        })();

        FileExt::unlock(&lock)?;
        debug!(ops = batch.ops().len(), ok = result.is_ok(), "Vault commit");
        result
    }
}

/// Read the vault key, generating it (0600) the first time.
///
/// The key is written to a private temp sibling and hard-linked into place,
/// so `key_path` only ever appears with all of its bytes.
fn load_or_create_key(key_path: &Path) -> StorageResult<Vec<u8>> {
    if let Some(existing) = read_key(key_path)? {
        return Ok(existing);
    }
    if let Some(parent) = key_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);

    let tmp_path = key_path.with_extension(format!(
        "key.tmp.{}.{}",
        std::process::id(),
        rand::thread_rng().next_u32()
    ));
    {
        let mut tmp = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&tmp_path)?;
        tmp.write_all(&key)?;
        tmp.sync_all()?;
    }

    let linked = std::fs::hard_link(&tmp_path, key_path);
    let _ = std::fs::remove_file(&tmp_path);
    match linked {
        Ok(()) => {
            info!(path = %key_path.display(), "Created vault key");
            Ok(key.to_vec())
        }
        // Another process linked its key first; use that one.
        Err(e) if e.kind() == ErrorKind::AlreadyExists => read_key(key_path)?.ok_or_else(|| {
            StorageError::Crypto(format!("vault key {} vanished", key_path.display()))
        }),
        Err(e) => Err(e.into()),
    }
}

fn read_key(key_path: &Path) -> StorageResult<Option<Vec<u8>>> {
    let mut file = match File::open(key_path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut existing = Vec::with_capacity(KEY_SIZE);
    file.read_to_end(&mut existing)?;
    if existing.len() != KEY_SIZE {
        return Err(StorageError::Crypto(format!(
            "vault key has {} bytes, expected {}",
            existing.len(),
            KEY_SIZE
        )));
    }
    Ok(Some(existing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::{tempdir, TempDir};

    fn sealed_vault(dir: &TempDir) -> FileVault {
        FileVault::sealed(
            dir.path().join("vault.json"),
            dir.path().join("vault.lock"),
            &dir.path().join("vault.key"),
            "com.example.app",
        )
        .unwrap()
    }

    #[test]
    fn test_set_get_delete() {
        let dir = tempdir().unwrap();
        let vault = sealed_vault(&dir);

        assert_eq!(vault.get("access_token").unwrap(), None);
        vault.set("access_token", "A1").unwrap();
        assert_eq!(vault.get("access_token").unwrap(), Some("A1".to_string()));
        assert!(vault.has("access_token").unwrap());

        assert!(vault.delete("access_token").unwrap());
        assert!(!vault.delete("access_token").unwrap());
        assert_eq!(vault.get("access_token").unwrap(), None);
    }

    #[test]
    fn test_values_are_not_stored_in_plaintext() {
        let dir = tempdir().unwrap();
        let vault = sealed_vault(&dir);
        vault.set("refresh_token", "very-secret-refresh").unwrap();

        let raw = std::fs::read_to_string(dir.path().join("vault.json")).unwrap();
        assert!(raw.contains("refresh_token"));
        assert!(!raw.contains("very-secret-refresh"));
    }

    #[test]
    fn test_second_instance_sees_committed_data() {
        let dir = tempdir().unwrap();
        let writer = sealed_vault(&dir);
        let reader = sealed_vault(&dir);

        let mut batch = WriteBatch::new();
        batch.set("access_token", "A1").set("expires_at", "2030-01-01T00:00:00Z");
        writer.commit(&batch).unwrap();

        assert_eq!(reader.get("access_token").unwrap(), Some("A1".to_string()));
        assert_eq!(
            reader.keys().unwrap(),
            vec!["access_token".to_string(), "expires_at".to_string()]
        );
    }

    #[test]
    fn test_corrupt_entry_only_fails_its_own_read() {
        let dir = tempdir().unwrap();
        let vault = sealed_vault(&dir);
        vault.set("access_token", "A1").unwrap();
        vault.set("id_token", "I1").unwrap();

        let path = dir.path().join("vault.json");
        let mut document: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        document["entries"]["id_token"]["value"] = serde_json::json!("AAAAAAAAAAAAAAAAAAAAAAAAAAAA");
        std::fs::write(&path, serde_json::to_string(&document).unwrap()).unwrap();

        assert!(vault.get("id_token").is_err());
        assert_eq!(vault.get("access_token").unwrap(), Some("A1".to_string()));
    }

    #[test]
    fn test_entries_are_bound_to_their_key_name() {
        let dir = tempdir().unwrap();
        let vault = sealed_vault(&dir);
        vault.set("access_token", "A1").unwrap();

        let path = dir.path().join("vault.json");
        let mut document: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let moved = document["entries"]["access_token"].clone();
        document["entries"]["refresh_token"] = moved;
        std::fs::write(&path, serde_json::to_string(&document).unwrap()).unwrap();

        assert!(matches!(
            vault.get("refresh_token"),
            Err(StorageError::Crypto(_))
        ));
    }

    #[test]
    fn test_unparsable_file_is_reported_as_corrupt() {
        let dir = tempdir().unwrap();
        let vault = sealed_vault(&dir);
        std::fs::write(dir.path().join("vault.json"), "{ not json").unwrap();

        assert!(matches!(vault.get("access_token"), Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn test_commit_rebuilds_unparsable_file() {
        let dir = tempdir().unwrap();
        let vault = sealed_vault(&dir);
        vault.set("access_token", "A1").unwrap();
        std::fs::write(dir.path().join("vault.json"), "{ truncated").unwrap();

        assert!(!vault.delete("access_token").unwrap());
        let mut batch = WriteBatch::new();
        batch.set("access_token", "A2");
        vault.commit(&batch).unwrap();

        assert_eq!(vault.get("access_token").unwrap(), Some("A2".to_string()));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("vault.json.corrupt")).unwrap(),
            "{ truncated"
        );
    }

    #[test]
    fn test_concurrent_first_open_shares_one_key() {
        for _ in 0..50 {
            let dir = tempdir().unwrap();
            let base = dir.path().to_path_buf();
            let barrier = std::sync::Arc::new(std::sync::Barrier::new(4));

            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let base = base.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        let vault = FileVault::sealed(
                            base.join("vault.json"),
                            base.join("vault.lock"),
                            &base.join("vault.key"),
                            "com.example.app",
                        )?;
                        vault.set(&format!("writer_{}", i), "value")?;
                        Ok::<_, StorageError>(vault)
                    })
                })
                .collect();

            let vaults: Vec<FileVault> = handles
                .into_iter()
                .map(|h| h.join().unwrap().unwrap())
                .collect();
            for vault in &vaults {
                for i in 0..4 {
                    assert_eq!(
                        vault.get(&format!("writer_{}", i)).unwrap(),
                        Some("value".to_string())
                    );
                }
            }
            assert_eq!(std::fs::metadata(base.join("vault.key")).unwrap().len(), 32);
        }
    }

    #[test]
    fn test_key_file_is_private_and_reused() {
        let dir = tempdir().unwrap();
        let first = sealed_vault(&dir);
        first.set("dpop_jwk", "{\"kty\":\"EC\"}").unwrap();

        let key_path = dir.path().join("vault.key");
        let mode = std::fs::metadata(&key_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let second = sealed_vault(&dir);
        assert_eq!(
            second.get("dpop_jwk").unwrap(),
            Some("{\"kty\":\"EC\"}".to_string())
        );
    }

    #[test]
    fn test_plaintext_vault_cannot_read_sealed_entries() {
        let dir = tempdir().unwrap();
        sealed_vault(&dir).set("access_token", "A1").unwrap();

        let plain = FileVault::plaintext(dir.path().join("vault.json"), dir.path().join("vault.lock"));
        assert!(plain.get("access_token").is_err());
    }

    #[test]
    fn test_truncated_key_file_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("vault.key"), [1u8; 7]).unwrap();

        let result = FileVault::sealed(
            dir.path().join("vault.json"),
            dir.path().join("vault.lock"),
            &dir.path().join("vault.key"),
            "com.example.app",
        );
        assert!(matches!(result, Err(StorageError::Crypto(_))));
    }
}

//! In-memory storage.

use crate::{SecureStorage, StorageResult, WriteBatch, WriteOp};
use parking_lot::Mutex;
use std::collections::HashMap;

/// In-memory storage for tests and sessions that must not touch disk.
#[derive(Default)]
pub struct MemoryStorage {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureStorage for MemoryStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.data.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.data.lock().remove(key).is_some())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys: Vec<String> = self.data.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn commit(&self, batch: &WriteBatch) -> StorageResult<()> {
        let mut data = self.data.lock();
        for op in batch.ops() {
            match op {
                WriteOp::Set { key, value } => {
                    data.insert(key.clone(), value.clone());
                }
                WriteOp::Delete { key } => {
                    data.remove(key);
                }
            }
        }
        Ok(())
    }
}

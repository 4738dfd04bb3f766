//! Storage trait definitions.

use crate::StorageResult;

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Set { key: String, value: String },
    Delete { key: String },
}

/// Ordered group of mutations committed together.
///
/// Backends that can commit atomically apply the whole batch at once. Those
/// that cannot apply it op by op, in insertion order, so callers encode their
/// crash-safety ordering in the batch itself.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: &str) -> &mut Self {
        self.ops.push(WriteOp::Set {
            key: key.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn delete(&mut self, key: &str) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            key: key.to_string(),
        });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Trait for secure storage backends
pub trait SecureStorage: Send + Sync {
    /// Store a value securely
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve a value
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Delete a value. Returns whether it existed.
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Every key currently stored.
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Apply a batch. The default applies ops in order and stops at the first
    /// failure; override when the backend can commit atomically.
    fn commit(&self, batch: &WriteBatch) -> StorageResult<()> {
        for op in batch.ops() {
            match op {
                WriteOp::Set { key, value } => self.set(key, value)?,
                WriteOp::Delete { key } => {
                    self.delete(key)?;
                }
            }
        }
        Ok(())
    }
}

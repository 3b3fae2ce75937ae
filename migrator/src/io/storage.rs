//! Storage collaborator contract and an in-memory transactional store.
//!
//! The driver is generic over [`Storage`]; it enumerates keys, reads decoded
//! values, writes replacements and commits. Values are handed out behind an
//! [`Arc`] because [`Value`] cannot be copied.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::value::{Address, Value};

/// Storage domain an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageDomain {
    Storage,
    Public,
    Private,
    Contract,
}

impl StorageDomain {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Public => "public",
            Self::Private => "private",
            Self::Contract => "contract",
        }
    }
}

/// Address × domain × key identifying one storage entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StorageKey {
    pub address: Address,
    pub domain: StorageDomain,
    pub key: String,
}

impl StorageKey {
    pub fn new(address: Address, domain: StorageDomain, key: impl Into<String>) -> Self {
        Self {
            address,
            domain,
            key: key.into(),
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.address, self.domain.as_str(), self.key)
    }
}

/// Failure reported by the storage collaborator. Always fatal to a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("read failed for {key}: {reason}")]
    Read { key: StorageKey, reason: String },
    #[error("write failed for {key}: {reason}")]
    Write { key: StorageKey, reason: String },
    #[error("commit failed: {0}")]
    Commit(String),
}

/// Keyed storage of decoded values with run-level transactions.
pub trait Storage {
    /// All entry keys, in a stable order.
    fn keys(&self) -> Result<Vec<StorageKey>, StorageError>;

    /// Current value for `key`, including uncommitted writes.
    fn get(&self, key: &StorageKey) -> Result<Option<Arc<Value>>, StorageError>;

    /// Stage a replacement value for `key`.
    fn set(&mut self, key: &StorageKey, value: Value) -> Result<(), StorageError>;

    /// Make staged writes durable.
    fn commit(&mut self) -> Result<(), StorageError>;

    /// Discard staged writes.
    fn rollback(&mut self) -> Result<(), StorageError>;
}

/// In-memory [`Storage`] with staged writes.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    committed: BTreeMap<StorageKey, Arc<Value>>,
    staged: BTreeMap<StorageKey, Arc<Value>>,
    writes: usize,
    commits: usize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a committed entry directly (used when loading storage).
    pub fn insert(&mut self, key: StorageKey, value: Value) -> Option<Arc<Value>> {
        self.committed.insert(key, Arc::new(value))
    }

    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }

    /// Committed value for `key`, ignoring staged writes.
    pub fn committed(&self, key: &StorageKey) -> Option<&Arc<Value>> {
        self.committed.get(key)
    }

    /// Number of `set` calls since creation.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Number of successful `commit` calls since creation.
    pub fn commit_count(&self) -> usize {
        self.commits
    }

    pub fn has_staged_writes(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Committed entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = (&StorageKey, &Arc<Value>)> {
        self.committed.iter()
    }

    /// Consume the store, keeping committed entries only.
    pub fn into_committed(self) -> BTreeMap<StorageKey, Arc<Value>> {
        self.committed
    }
}

impl Storage for MemoryStorage {
    fn keys(&self) -> Result<Vec<StorageKey>, StorageError> {
        Ok(self.committed.keys().cloned().collect())
    }

    fn get(&self, key: &StorageKey) -> Result<Option<Arc<Value>>, StorageError> {
        Ok(self
            .staged
            .get(key)
            .or_else(|| self.committed.get(key))
            .cloned())
    }

    fn set(&mut self, key: &StorageKey, value: Value) -> Result<(), StorageError> {
        self.writes += 1;
        self.staged.insert(key.clone(), Arc::new(value));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        let staged = std::mem::take(&mut self.staged);
        self.committed.extend(staged);
        self.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        self.staged.clear();
        Ok(())
    }
}

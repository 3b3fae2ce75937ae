//! Storage snapshot load/save with schema + invariant validation.
//!
//! A snapshot is a JSON document holding the entitlement catalog and every
//! storage entry. It is the file-backed storage the CLI migrates.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::entitled_type::EntitlementCatalog;
use crate::core::value::{Address, Value};
use crate::io::storage::{MemoryStorage, StorageDomain, StorageKey};

const SNAPSHOT_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/storage_snapshot/v1.schema.json"
));

/// One persisted storage entry.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub address: Address,
    pub domain: StorageDomain,
    pub key: String,
    pub value: Value,
}

impl SnapshotEntry {
    pub fn storage_key(&self) -> StorageKey {
        StorageKey::new(self.address, self.domain, self.key.clone())
    }
}

/// Entitlement catalog plus storage entries.
#[derive(Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    pub entitlements: EntitlementCatalog,
    pub entries: Vec<SnapshotEntry>,
}

impl StorageSnapshot {
    /// Split into the inference catalog and a loaded in-memory storage.
    pub fn into_parts(self) -> Result<(EntitlementCatalog, MemoryStorage)> {
        let mut storage = MemoryStorage::new();
        for entry in self.entries {
            let key = entry.storage_key();
            if storage.insert(key.clone(), entry.value).is_some() {
                return Err(anyhow!("duplicate snapshot entry {key}"));
            }
        }
        Ok((self.entitlements, storage))
    }

    /// Rebuild a snapshot from committed storage contents.
    ///
    /// Fails if a committed value is still shared elsewhere, since values
    /// cannot be copied out of storage.
    pub fn from_parts(entitlements: EntitlementCatalog, storage: MemoryStorage) -> Result<Self> {
        let committed = storage.into_committed();
        let mut entries = Vec::with_capacity(committed.len());
        for (key, shared) in committed {
            let value =
                Arc::try_unwrap(shared).map_err(|_| anyhow!("entry {key} is still shared"))?;
            entries.push(SnapshotEntry {
                address: key.address,
                domain: key.domain,
                key: key.key,
                value,
            });
        }
        Ok(Self {
            entitlements,
            entries,
        })
    }
}

/// Load and validate a snapshot from disk (schema + invariants).
pub fn load_snapshot(path: &Path) -> Result<StorageSnapshot> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read snapshot {}", path.display()))?;
    let raw: serde_json::Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse snapshot {}", path.display()))?;
    validate_schema(&raw)?;
    let snapshot: StorageSnapshot = serde_json::from_value(raw)
        .with_context(|| format!("deserialize snapshot {}", path.display()))?;
    validate_snapshot_invariants(&snapshot)?;
    debug!(
        path = %path.display(),
        entries = snapshot.entries.len(),
        catalog_types = snapshot.entitlements.len(),
        "snapshot loaded"
    );
    Ok(snapshot)
}

/// Atomically write a snapshot to disk (temp file + rename).
pub fn write_snapshot(path: &Path, snapshot: &StorageSnapshot) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(snapshot).context("serialize snapshot")?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp snapshot {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace snapshot {}", path.display()))?;
    debug!(path = %path.display(), entries = snapshot.entries.len(), "snapshot written");
    Ok(())
}

fn validate_schema(snapshot: &serde_json::Value) -> Result<()> {
    let schema: serde_json::Value =
        serde_json::from_str(SNAPSHOT_SCHEMA).context("parse embedded snapshot schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(snapshot) {
        let messages = compiled
            .iter_errors(snapshot)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "snapshot schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

/// Semantic invariants not expressible in JSON Schema: unique entry keys.
fn validate_snapshot_invariants(snapshot: &StorageSnapshot) -> Result<()> {
    let mut seen = BTreeSet::new();
    let mut errors = Vec::new();
    for entry in &snapshot.entries {
        let key = entry.storage_key();
        if !seen.insert(key.clone()) {
            errors.push(format!("duplicate entry {key}"));
        }
    }
    if errors.is_empty() {
        return Ok(());
    }
    Err(anyhow!("snapshot invariants failed: {}", errors.join("; ")))
}

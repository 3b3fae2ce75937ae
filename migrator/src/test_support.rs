//! Test-only builders for values, storage and scripted migrations.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use tempfile::TempDir;

use crate::core::entitled_type::EntitlementCatalog;
use crate::core::error::MigrationError;
use crate::core::types::{Authorization, EntitlementId, SetKind, StaticType, TypeId};
use crate::core::value::{
    Address, ArrayValue, CapabilityValue, CompositeField, CompositeKind, CompositeValue,
    DictionaryEntry, DictionaryValue, OptionalValue, PrimitiveValue, ReferenceValue, SlotId, Value,
};
use crate::io::snapshot::{SnapshotEntry, StorageSnapshot, write_snapshot};
use crate::io::storage::{MemoryStorage, Storage, StorageDomain, StorageError, StorageKey};
use crate::migrations::Migration;

/// Catalog from `(type, entitlements)` pairs.
pub fn catalog(types: &[(&str, &[&str])]) -> EntitlementCatalog {
    let mut catalog = EntitlementCatalog::new();
    for (ty, entitlements) in types {
        catalog.declare(*ty, entitlements.iter().copied());
    }
    catalog
}

/// Conjunctive authorization over `entitlements` (unauthorized if empty).
pub fn entitled(entitlements: &[&str]) -> Authorization {
    let set: BTreeSet<EntitlementId> = entitlements.iter().map(|e| EntitlementId::new(*e)).collect();
    Authorization::from_entitlements(SetKind::Conjunction, set)
}

pub fn int(n: i64) -> Value {
    Value::Primitive(PrimitiveValue::Int(n))
}

pub fn string(s: &str) -> Value {
    Value::Primitive(PrimitiveValue::String(s.to_string()))
}

/// The integer inside `value`, if it is an `Int` primitive.
pub fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Primitive(PrimitiveValue::Int(n)) => Some(*n),
        _ => None,
    }
}

/// Structurally equal, independently built copy of `value`.
pub fn duplicate(value: &Value) -> Value {
    let json = serde_json::to_value(value).expect("serialize value");
    serde_json::from_value(json).expect("deserialize value")
}

pub fn composite(slot: u64, ty: &str, kind: CompositeKind, fields: Vec<(&str, Value)>) -> Value {
    Value::Composite(Arc::new(CompositeValue {
        slot: SlotId::new(slot),
        type_id: TypeId::new(ty),
        kind,
        fields: fields
            .into_iter()
            .map(|(name, value)| CompositeField {
                name: name.to_string(),
                value,
            })
            .collect(),
    }))
}

pub fn structure(slot: u64, ty: &str, fields: Vec<(&str, Value)>) -> Value {
    composite(slot, ty, CompositeKind::Structure, fields)
}

pub fn resource(slot: u64, ty: &str, fields: Vec<(&str, Value)>) -> Value {
    composite(slot, ty, CompositeKind::Resource, fields)
}

/// Array value; resource-kinded when any element is.
pub fn array(slot: u64, static_type: StaticType, elements: Vec<Value>) -> Value {
    Value::Array(Arc::new(ArrayValue {
        slot: SlotId::new(slot),
        static_type,
        resource_kinded: elements.iter().any(Value::is_resource_kinded),
        elements,
    }))
}

/// Dictionary value; resource-kinded when any key or value is.
pub fn dictionary(slot: u64, static_type: StaticType, entries: Vec<(Value, Value)>) -> Value {
    let resource_kinded = entries
        .iter()
        .any(|(key, value)| key.is_resource_kinded() || value.is_resource_kinded());
    Value::Dictionary(Arc::new(DictionaryValue {
        slot: SlotId::new(slot),
        static_type,
        resource_kinded,
        entries: entries
            .into_iter()
            .map(|(key, value)| DictionaryEntry { key, value })
            .collect(),
    }))
}

pub fn optional(static_type: StaticType, inner: Option<Value>) -> Value {
    Value::Optional(OptionalValue {
        static_type,
        inner: inner.map(Box::new),
    })
}

/// Reference to `target`; its authorization is taken from `declared_type`.
pub fn reference(target: u64, declared_type: StaticType) -> Value {
    let authorization = match &declared_type {
        StaticType::Reference { authorization, .. } => authorization.clone(),
        _ => Authorization::Unauthorized,
    };
    Value::Reference(ReferenceValue {
        target: SlotId::new(target),
        authorization,
        declared_type,
    })
}

pub fn capability(address: u64, borrow_type: StaticType) -> Value {
    Value::Capability(CapabilityValue {
        address: Address::from_u64(address),
        id: 1,
        borrow_type,
    })
}

/// Key in the `storage` domain.
pub fn storage_key(address: u64, key: &str) -> StorageKey {
    StorageKey::new(Address::from_u64(address), StorageDomain::Storage, key)
}

type MigrateFn = dyn Fn(&Value) -> Result<Value, MigrationError> + Send + Sync;

/// Migration driven by a closure, counting its calls.
pub struct ScriptedMigration {
    name: String,
    migrate: Box<MigrateFn>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedMigration {
    pub fn new<F>(name: &str, migrate: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, MigrationError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            migrate: Box::new(migrate),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Always succeeds with `replace(value)`.
    pub fn replace_with<F>(name: &str, replace: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self::new(name, move |value| Ok(replace(value)))
    }

    /// Returns an equal copy of every value.
    pub fn identity(name: &str) -> Self {
        Self::replace_with(name, duplicate)
    }

    /// Always fails with `error()`.
    pub fn failing<F>(name: &str, error: F) -> Self
    where
        F: Fn() -> MigrationError + Send + Sync + 'static,
    {
        Self::new(name, move |_| Err(error()))
    }

    /// Shared call counter, readable after the migration moved into a registry.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Migration for ScriptedMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn migrate(&self, value: &Value) -> Result<Value, MigrationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.migrate)(value)
    }
}

/// [`MemoryStorage`] that fails on demand.
#[derive(Debug, Default)]
pub struct FailingStorage {
    pub inner: MemoryStorage,
    /// Reads of this key fail.
    pub fail_get: Option<StorageKey>,
    /// Every commit fails.
    pub fail_commit: bool,
    /// `keys` fails.
    pub unavailable: bool,
}

impl FailingStorage {
    pub fn new(inner: MemoryStorage) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }
}

impl Storage for FailingStorage {
    fn keys(&self) -> Result<Vec<StorageKey>, StorageError> {
        if self.unavailable {
            return Err(StorageError::Unavailable("scripted outage".to_string()));
        }
        self.inner.keys()
    }

    fn get(&self, key: &StorageKey) -> Result<Option<Arc<Value>>, StorageError> {
        if self.fail_get.as_ref() == Some(key) {
            return Err(StorageError::Read {
                key: key.clone(),
                reason: "scripted read failure".to_string(),
            });
        }
        self.inner.get(key)
    }

    fn set(&mut self, key: &StorageKey, value: Value) -> Result<(), StorageError> {
        self.inner.set(key, value)
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        if self.fail_commit {
            return Err(StorageError::Commit("scripted commit failure".to_string()));
        }
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        self.inner.rollback()
    }
}

/// Snapshot file in a temporary directory.
pub struct SnapshotFixture {
    dir: TempDir,
    path: PathBuf,
}

impl SnapshotFixture {
    pub fn new(snapshot: &StorageSnapshot) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("snapshot.json");
        write_snapshot(&path, snapshot)?;
        Ok(Self { dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Snapshot entry at `address` in the `storage` domain.
pub fn snapshot_entry(address: u64, key: &str, value: Value) -> SnapshotEntry {
    SnapshotEntry {
        address: Address::from_u64(address),
        domain: StorageDomain::Storage,
        key: key.to_string(),
        value,
    }
}

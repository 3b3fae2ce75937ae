//! Migration plugin contract and the ordered registry the driver runs.

pub mod entitlements;

use std::collections::BTreeSet;

use thiserror::Error;

use crate::core::error::MigrationError;
use crate::core::value::Value;

pub use entitlements::EntitlementsMigration;

/// A named transformation applied to every value in storage.
///
/// `migrate` receives the current value of one entry and returns its
/// replacement. Returning a value equal to the input means "no change".
/// Implementations run on worker threads and must not share mutable state
/// between entries.
pub trait Migration: Send + Sync {
    fn name(&self) -> &str;

    fn migrate(&self, value: &Value) -> Result<Value, MigrationError>;
}

/// Registry misconfiguration. Fatal to a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("migration name must not be empty")]
    EmptyName,
    #[error("migration {0:?} is already registered")]
    DuplicateName(String),
}

/// Ordered list of migrations, built by the caller and handed to the driver.
#[derive(Default)]
pub struct MigrationRegistry {
    migrations: Vec<Box<dyn Migration>>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `migration`; it runs after every migration registered before it.
    pub fn register(&mut self, migration: impl Migration + 'static) -> Result<(), RegistryError> {
        self.register_boxed(Box::new(migration))
    }

    pub fn register_boxed(&mut self, migration: Box<dyn Migration>) -> Result<(), RegistryError> {
        let name = migration.name();
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.migrations.iter().any(|existing| existing.name() == name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        self.migrations.push(migration);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, migration: impl Migration + 'static) -> Result<Self, RegistryError> {
        self.register(migration)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Migrations in run order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Migration> {
        self.migrations.iter().map(|migration| migration.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.iter().map(|migration| migration.name().to_string()).collect()
    }

    /// Re-check registry invariants (non-empty, unique names).
    pub fn validate(&self) -> Result<(), RegistryError> {
        let mut seen = BTreeSet::new();
        for migration in self.iter() {
            let name = migration.name();
            if name.trim().is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if !seen.insert(name) {
                return Err(RegistryError::DuplicateName(name.to_string()));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("migrations", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedMigration, int};

    #[test]
    fn registration_keeps_order() {
        let registry = MigrationRegistry::new()
            .with(ScriptedMigration::identity("first"))
            .and_then(|registry| registry.with(ScriptedMigration::identity("second")))
            .expect("register");
        assert_eq!(registry.names(), vec!["first", "second"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = MigrationRegistry::new();
        registry
            .register(ScriptedMigration::identity("same"))
            .expect("first");
        let err = registry
            .register(ScriptedMigration::identity("same"))
            .expect_err("duplicate");
        assert_eq!(err, RegistryError::DuplicateName("same".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn blank_names_are_rejected() {
        let mut registry = MigrationRegistry::new();
        let err = registry
            .register(ScriptedMigration::identity("  "))
            .expect_err("blank");
        assert_eq!(err, RegistryError::EmptyName);
        assert!(registry.is_empty());
    }

    #[test]
    fn registered_migrations_are_callable_through_the_registry() {
        let registry = MigrationRegistry::new()
            .with(ScriptedMigration::replace_with("bump", |_| int(2)))
            .expect("register");
        let migration = registry.iter().next().expect("one migration");
        assert_eq!(migration.migrate(&int(1)).expect("migrate"), int(2));
        assert!(registry.validate().is_ok());
    }
}

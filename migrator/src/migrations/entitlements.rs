//! The entitlements rewrite: unauthorized references become entitled ones.

use crate::core::entitled_type::EntitlementInference;
use crate::core::error::MigrationError;
use crate::core::value::Value;
use crate::core::value_migrator::ValueMigrator;
use crate::migrations::Migration;

/// Registered name of [`EntitlementsMigration`].
pub const ENTITLEMENTS_MIGRATION: &str = "EntitlementsMigration";

/// Rewrites every reference type and value in an entry using `inference`.
///
/// Each call gets a fresh slot table, so identity tracking never leaks across
/// storage entries.
#[derive(Debug)]
pub struct EntitlementsMigration<I> {
    inference: I,
}

impl<I: EntitlementInference> EntitlementsMigration<I> {
    pub fn new(inference: I) -> Self {
        Self { inference }
    }

    pub fn inference(&self) -> &I {
        &self.inference
    }
}

impl<I: EntitlementInference> Migration for EntitlementsMigration<I> {
    fn name(&self) -> &str {
        ENTITLEMENTS_MIGRATION
    }

    fn migrate(&self, value: &Value) -> Result<Value, MigrationError> {
        ValueMigrator::new(&self.inference).migrate(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StaticType;
    use crate::core::value::SlotId;
    use crate::test_support::{catalog, entitled, reference, resource};

    /// A resource field holding `&Vault` gains `auth(Withdraw)` and keeps its
    /// slot and target.
    #[test]
    fn resource_field_reference_is_entitled() {
        let migration = EntitlementsMigration::new(catalog(&[("Vault", &["Withdraw"])]));
        let holder = resource(
            10,
            "Holder",
            vec![(
                "vault",
                reference(11, StaticType::unauthorized_reference(StaticType::leaf("Vault"))),
            )],
        );

        let Value::Composite(out) = migration.migrate(&holder).expect("migrate") else {
            panic!("expected composite");
        };
        assert_eq!(out.slot, SlotId::new(10));
        let Some(Value::Reference(field)) = out.field("vault") else {
            panic!("expected reference");
        };
        assert_eq!(field.target, SlotId::new(11));
        assert_eq!(field.authorization, entitled(&["Withdraw"]));
        assert_eq!(migration.name(), "EntitlementsMigration");
    }

    #[test]
    fn slot_tables_do_not_leak_between_calls() {
        let migration = EntitlementsMigration::new(catalog(&[]));
        let value = resource(1, "R", vec![]);
        // The same resource slot in two separate entries is not a duplicate owner.
        migration.migrate(&value).expect("first entry");
        migration.migrate(&value).expect("second entry");
    }
}

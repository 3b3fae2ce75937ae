//! Structural walk over a value tree applying the entitled-type conversion.
//!
//! The walker builds a fresh output tree from a borrowed input. Each
//! storage-resident slot is migrated at most once per walk: the slot table
//! remembers the migrated instance and hands it back on repeat visits, so
//! aliased positions share one output. A repeat visit must carry the same
//! input as the first one, either the same handle or an equal copy; a
//! diverging copy is a shape mismatch.
//! A resource slot seen in a second owning position is rejected instead of
//! shared, since that would give the resource two owners.
//! Owned trees have no back-edges, so a slot reached while its own migration
//! is still in progress is corrupt input and fails as a linearity violation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::core::entitled_type::{EntitledTypeConverter, EntitlementInference};
use crate::core::error::MigrationError;
use crate::core::types::StaticType;
use crate::core::value::{
    ArrayValue, CapabilityValue, CompositeField, CompositeKind, CompositeValue, DictionaryEntry,
    DictionaryValue, OptionalValue, ReferenceValue, SlotId, TypeValue, Value,
};

/// Root path label used in diagnostics.
pub const ROOT_PATH: &str = "$";

enum SlotState {
    InProgress,
    Done { input: SlotValue, output: SlotValue },
}

/// Handle to a slot-bearing value, on either side of the migration.
enum SlotValue {
    Composite(Arc<CompositeValue>),
    Array(Arc<ArrayValue>),
    Dictionary(Arc<DictionaryValue>),
}

impl SlotValue {
    fn to_value(&self) -> Value {
        match self {
            Self::Composite(composite) => Value::Composite(Arc::clone(composite)),
            Self::Array(array) => Value::Array(Arc::clone(array)),
            Self::Dictionary(dictionary) => Value::Dictionary(Arc::clone(dictionary)),
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            Self::Composite(_) => "composite",
            Self::Array(_) => "array",
            Self::Dictionary(_) => "dictionary",
        }
    }

    /// Same handle, or a structurally equal copy.
    fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Composite(a), Self::Composite(b)) => Arc::ptr_eq(a, b) || a == b,
            (Self::Array(a), Self::Array(b)) => Arc::ptr_eq(a, b) || a == b,
            (Self::Dictionary(a), Self::Dictionary(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

/// Identity-tracking migrator for a single value tree.
///
/// Create one per storage entry; the slot table is scoped to that tree.
pub struct ValueMigrator<'a, I: EntitlementInference + ?Sized> {
    converter: EntitledTypeConverter<'a, I>,
    slots: HashMap<SlotId, SlotState>,
}

impl<'a, I: EntitlementInference + ?Sized> ValueMigrator<'a, I> {
    pub fn new(inference: &'a I) -> Self {
        Self {
            converter: EntitledTypeConverter::new(inference),
            slots: HashMap::new(),
        }
    }

    /// Migrated form of `value`.
    pub fn migrate(&mut self, value: &Value) -> Result<Value, MigrationError> {
        self.migrate_at(value, ROOT_PATH)
    }

    /// Number of distinct slots migrated so far.
    pub fn migrated_slots(&self) -> usize {
        self.slots
            .values()
            .filter(|state| matches!(state, SlotState::Done { .. }))
            .count()
    }

    fn migrate_at(&mut self, value: &Value, path: &str) -> Result<Value, MigrationError> {
        match value {
            Value::Composite(composite) => self.migrate_composite(composite, path),
            Value::Optional(optional) => self.migrate_optional(optional, path),
            Value::Capability(capability) => Ok(Value::Capability(CapabilityValue {
                address: capability.address,
                id: capability.id,
                borrow_type: self.converter.convert(&capability.borrow_type)?,
            })),
            Value::Array(array) => self.migrate_array(array, path),
            Value::Dictionary(dictionary) => self.migrate_dictionary(dictionary, path),
            Value::Reference(reference) => {
                Ok(Value::Reference(self.migrate_reference(reference, path)?))
            }
            Value::Type(type_value) => {
                let static_type = match &type_value.static_type {
                    Some(ty) => Some(self.converter.convert(ty)?),
                    None => None,
                };
                Ok(Value::Type(TypeValue { static_type }))
            }
            Value::Primitive(primitive) => Ok(Value::Primitive(primitive.clone())),
        }
    }

    /// Returns the already migrated instance for `slot`, or marks it in progress.
    fn enter_slot(
        &mut self,
        slot: SlotId,
        input: &SlotValue,
        resource: bool,
        path: &str,
    ) -> Result<Option<Value>, MigrationError> {
        match self.slots.get(&slot) {
            None => {
                self.slots.insert(slot, SlotState::InProgress);
                Ok(None)
            }
            Some(SlotState::InProgress) => Err(MigrationError::linearity(
                path,
                Some(slot),
                "value is reachable from inside itself",
            )),
            Some(SlotState::Done { input: first, output }) => {
                if first.variant_name() != input.variant_name() {
                    return Err(MigrationError::shape(
                        path,
                        format!("{} for {slot}", first.variant_name()),
                        input.variant_name(),
                    ));
                }
                if resource {
                    return Err(MigrationError::linearity(
                        path,
                        Some(slot),
                        "resource already has an owner",
                    ));
                }
                if !first.same_as(input) {
                    return Err(MigrationError::shape(
                        path,
                        format!("identical copy of {slot}"),
                        "diverging copy",
                    ));
                }
                Ok(Some(output.to_value()))
            }
        }
    }

    fn finish_slot(&mut self, slot: SlotId, input: SlotValue, output: SlotValue) -> Value {
        let value = output.to_value();
        self.slots.insert(slot, SlotState::Done { input, output });
        value
    }

    fn migrate_composite(
        &mut self,
        composite: &Arc<CompositeValue>,
        path: &str,
    ) -> Result<Value, MigrationError> {
        let resource = composite.kind == CompositeKind::Resource;
        let input = SlotValue::Composite(Arc::clone(composite));
        if let Some(shared) = self.enter_slot(composite.slot, &input, resource, path)? {
            return Ok(shared);
        }

        let mut fields = Vec::with_capacity(composite.fields.len());
        for field in &composite.fields {
            let field_path = format!("{path}.{}", field.name);
            fields.push(CompositeField {
                name: field.name.clone(),
                value: self.migrate_at(&field.value, &field_path)?,
            });
        }

        let migrated = Arc::new(CompositeValue {
            slot: composite.slot,
            type_id: composite.type_id.clone(),
            kind: composite.kind,
            fields,
        });
        Ok(self.finish_slot(composite.slot, input, SlotValue::Composite(migrated)))
    }

    fn migrate_optional(
        &mut self,
        optional: &OptionalValue,
        path: &str,
    ) -> Result<Value, MigrationError> {
        if !matches!(optional.static_type, StaticType::Optional { .. }) {
            return Err(MigrationError::shape(
                path,
                "optional type",
                optional.static_type.variant_name(),
            ));
        }
        let static_type = self.converter.convert(&optional.static_type)?;
        let inner = match &optional.inner {
            Some(inner) => Some(Box::new(self.migrate_at(inner, &format!("{path}?"))?)),
            None => None,
        };
        Ok(Value::Optional(OptionalValue { static_type, inner }))
    }

    fn migrate_array(
        &mut self,
        array: &Arc<ArrayValue>,
        path: &str,
    ) -> Result<Value, MigrationError> {
        match &array.static_type {
            StaticType::VariableArray { .. } => {}
            StaticType::ConstantArray { size, .. } => {
                if usize::try_from(*size).ok() != Some(array.elements.len()) {
                    return Err(MigrationError::shape(
                        path,
                        format!("{size} elements"),
                        format!("{} elements", array.elements.len()),
                    ));
                }
            }
            other => {
                return Err(MigrationError::shape(path, "array type", other.variant_name()));
            }
        }
        let input = SlotValue::Array(Arc::clone(array));
        if let Some(shared) = self.enter_slot(array.slot, &input, array.resource_kinded, path)? {
            return Ok(shared);
        }

        let static_type = self.converter.convert(&array.static_type)?;
        let mut elements = Vec::with_capacity(array.elements.len());
        for (index, element) in array.elements.iter().enumerate() {
            elements.push(self.migrate_at(element, &format!("{path}[{index}]"))?);
        }

        let migrated = Arc::new(ArrayValue {
            slot: array.slot,
            static_type,
            resource_kinded: array.resource_kinded,
            elements,
        });
        Ok(self.finish_slot(array.slot, input, SlotValue::Array(migrated)))
    }

    fn migrate_dictionary(
        &mut self,
        dictionary: &Arc<DictionaryValue>,
        path: &str,
    ) -> Result<Value, MigrationError> {
        if !matches!(dictionary.static_type, StaticType::Dictionary { .. }) {
            return Err(MigrationError::shape(
                path,
                "dictionary type",
                dictionary.static_type.variant_name(),
            ));
        }
        let input = SlotValue::Dictionary(Arc::clone(dictionary));
        if let Some(shared) =
            self.enter_slot(dictionary.slot, &input, dictionary.resource_kinded, path)?
        {
            return Ok(shared);
        }

        let static_type = self.converter.convert(&dictionary.static_type)?;
        let mut keys = Vec::with_capacity(dictionary.entries.len());
        for (index, entry) in dictionary.entries.iter().enumerate() {
            keys.push(self.migrate_key(&entry.key, &format!("{path}<key {index}>"))?);
        }
        let mut seen = HashSet::with_capacity(keys.len());
        for (index, key) in keys.iter().enumerate() {
            if !seen.insert(key) {
                return Err(MigrationError::linearity(
                    &format!("{path}<key {index}>"),
                    Some(dictionary.slot),
                    "migrated key collides with another key",
                ));
            }
        }

        let mut entries = Vec::with_capacity(keys.len());
        for (index, (key, entry)) in keys.into_iter().zip(&dictionary.entries).enumerate() {
            let value = self.migrate_at(&entry.value, &format!("{path}[{index}]"))?;
            entries.push(DictionaryEntry { key, value });
        }

        let migrated = Arc::new(DictionaryValue {
            slot: dictionary.slot,
            static_type,
            resource_kinded: dictionary.resource_kinded,
            entries,
        });
        Ok(self.finish_slot(dictionary.slot, input, SlotValue::Dictionary(migrated)))
    }

    /// Keys keep their identity; only reference keys may change form.
    fn migrate_key(&mut self, key: &Value, path: &str) -> Result<Value, MigrationError> {
        if key.is_resource_kinded() {
            return Err(MigrationError::linearity(
                path,
                key.slot(),
                "resource used as a dictionary key",
            ));
        }
        let migrated = self.migrate_at(key, path)?;
        if !matches!(key, Value::Reference(_)) && &migrated != key {
            return Err(MigrationError::shape(
                path,
                "key unchanged by migration",
                format!("changed {} key", key.variant_name()),
            ));
        }
        Ok(migrated)
    }

    fn migrate_reference(
        &mut self,
        reference: &ReferenceValue,
        path: &str,
    ) -> Result<ReferenceValue, MigrationError> {
        if !matches!(reference.declared_type, StaticType::Reference { .. }) {
            return Err(MigrationError::shape(
                path,
                "reference type",
                reference.declared_type.variant_name(),
            ));
        }
        let declared_type = self.converter.convert(&reference.declared_type)?;
        let StaticType::Reference { authorization, .. } = &declared_type else {
            return Err(MigrationError::TypeConversion {
                ty: reference.declared_type.to_string(),
                reason: format!("reference converted to {}", declared_type.variant_name()),
            });
        };
        Ok(ReferenceValue {
            target: reference.target,
            authorization: authorization.clone(),
            declared_type,
        })
    }
}

/// Migrate one value tree with a fresh slot table.
pub fn migrate_value<I: EntitlementInference + ?Sized>(
    value: &Value,
    inference: &I,
) -> Result<Value, MigrationError> {
    ValueMigrator::new(inference).migrate(value)
}

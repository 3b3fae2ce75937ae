//! Decoded runtime values as handed over by the storage layer.
//!
//! Identity-bearing containers (composites, arrays, dictionaries) carry a
//! [`SlotId`] and sit behind an [`Arc`], so two positions may share one
//! instance. `Value` deliberately does not implement `Clone`: a second value
//! can only be obtained by building one.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::types::{Authorization, StaticType, TypeId};

/// Stable identity of a storage-resident value, owned by the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(u64);

impl SlotId {
    pub const fn new(index: u64) -> Self {
        Self(index)
    }

    pub fn index(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// Eight-byte account address, rendered as `0x` followed by 16 hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 8]);

impl Address {
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn from_u64(value: u64) -> Self {
        Self(value.to_be_bytes())
    }

    pub fn bytes(&self) -> [u8; 8] {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let digits = raw.strip_prefix("0x").unwrap_or(raw);
        if digits.is_empty() || digits.len() > 16 {
            return Err(format!("invalid address '{raw}': expected 1-16 hex digits"));
        }
        let padded = format!("{digits:0>16}");
        let decoded =
            hex::decode(&padded).map_err(|err| format!("invalid address '{raw}': {err}"))?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Address {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// Nominal kind of a composite value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositeKind {
    Structure,
    Resource,
    Contract,
    Enum,
    Event,
}

/// Instance of a nominal struct/resource/contract/enum/event type.
#[derive(Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeValue {
    pub slot: SlotId,
    pub type_id: TypeId,
    pub kind: CompositeKind,
    /// Fields in declaration order. Migration never reorders, adds, or removes them.
    pub fields: Vec<CompositeField>,
}

#[derive(Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeField {
    pub name: String,
    pub value: Value,
}

impl CompositeValue {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| &field.value)
    }

    pub fn static_type(&self) -> StaticType {
        StaticType::Leaf {
            id: self.type_id.clone(),
        }
    }
}

/// Optional value; `inner` is `None` for `nil`.
#[derive(Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionalValue {
    pub static_type: StaticType,
    pub inner: Option<Box<Value>>,
}

/// Capability granting access to a target account through `borrow_type`.
#[derive(Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilityValue {
    pub address: Address,
    pub id: u64,
    pub borrow_type: StaticType,
}

/// Variable- or constant-sized array.
#[derive(Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayValue {
    pub slot: SlotId,
    pub static_type: StaticType,
    pub resource_kinded: bool,
    pub elements: Vec<Value>,
}

/// Dictionary with unique keys, kept in storage order.
#[derive(Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DictionaryValue {
    pub slot: SlotId,
    pub static_type: StaticType,
    pub resource_kinded: bool,
    pub entries: Vec<DictionaryEntry>,
}

#[derive(Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub key: Value,
    pub value: Value,
}

impl DictionaryValue {
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries
            .iter()
            .find(|entry| &entry.key == key)
            .map(|entry| &entry.value)
    }
}

/// Non-owning reference to a storage-resident value.
#[derive(Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceValue {
    /// Weak target identity; never altered by migration.
    pub target: SlotId,
    pub authorization: Authorization,
    /// Declared static type; expected to be a reference type.
    pub declared_type: StaticType,
}

/// First-class runtime type value (`Type<T>()`); `None` for an unknown type.
#[derive(Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeValue {
    pub static_type: Option<StaticType>,
}

/// Leaf values opaque to the migration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveValue {
    Void,
    Bool(bool),
    Int(i64),
    UInt(u64),
    UFix64(u64),
    String(String),
    Address(Address),
    Path { domain: String, identifier: String },
}

/// Closed set of runtime values, each carrying (or implying) its static type.
#[derive(Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Composite(Arc<CompositeValue>),
    Optional(OptionalValue),
    Capability(CapabilityValue),
    Array(Arc<ArrayValue>),
    Dictionary(Arc<DictionaryValue>),
    Reference(ReferenceValue),
    Type(TypeValue),
    Primitive(PrimitiveValue),
}

impl Value {
    /// Identity of the value if it is storage-resident.
    pub fn slot(&self) -> Option<SlotId> {
        match self {
            Self::Composite(composite) => Some(composite.slot),
            Self::Array(array) => Some(array.slot),
            Self::Dictionary(dictionary) => Some(dictionary.slot),
            Self::Optional(_)
            | Self::Capability(_)
            | Self::Reference(_)
            | Self::Type(_)
            | Self::Primitive(_) => None,
        }
    }

    /// True for values with linear (move-only) ownership.
    pub fn is_resource_kinded(&self) -> bool {
        match self {
            Self::Composite(composite) => composite.kind == CompositeKind::Resource,
            Self::Array(array) => array.resource_kinded,
            Self::Dictionary(dictionary) => dictionary.resource_kinded,
            Self::Optional(optional) => optional
                .inner
                .as_deref()
                .is_some_and(Value::is_resource_kinded),
            Self::Capability(_) | Self::Reference(_) | Self::Type(_) | Self::Primitive(_) => false,
        }
    }

    /// Short variant label used in diagnostics.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Composite(_) => "composite",
            Self::Optional(_) => "optional",
            Self::Capability(_) => "capability",
            Self::Array(_) => "array",
            Self::Dictionary(_) => "dictionary",
            Self::Reference(_) => "reference",
            Self::Type(_) => "type",
            Self::Primitive(_) => "primitive",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parses_short_and_prefixed_forms() {
        let short: Address = "0x1".parse().expect("short");
        assert_eq!(short, Address::from_u64(1));
        assert_eq!(short.to_string(), "0x0000000000000001");

        let full: Address = "f8d6e0586b0a20c7".parse().expect("full");
        assert_eq!(full.to_string(), "0xf8d6e0586b0a20c7");
    }

    #[test]
    fn address_rejects_invalid_input() {
        assert!("0x".parse::<Address>().is_err());
        assert!("0xzz".parse::<Address>().is_err());
        assert!("0x00000000000000001".parse::<Address>().is_err());
    }

    #[test]
    fn resource_kind_follows_optional_contents() {
        let resource = Value::Composite(Arc::new(CompositeValue {
            slot: SlotId::new(1),
            type_id: TypeId::new("R"),
            kind: CompositeKind::Resource,
            fields: Vec::new(),
        }));
        let wrapped = Value::Optional(OptionalValue {
            static_type: StaticType::optional(StaticType::leaf("R")),
            inner: Some(Box::new(resource)),
        });
        assert!(wrapped.is_resource_kinded());

        let nil = Value::Optional(OptionalValue {
            static_type: StaticType::optional(StaticType::leaf("R")),
            inner: None,
        });
        assert!(!nil.is_resource_kinded());
    }

    #[test]
    fn value_json_round_trips_through_shared_handles() {
        let value = Value::Array(Arc::new(ArrayValue {
            slot: SlotId::new(7),
            static_type: StaticType::variable_array(StaticType::leaf("Int")),
            resource_kinded: false,
            elements: vec![Value::Primitive(PrimitiveValue::Int(-3))],
        }));
        let json = serde_json::to_string(&value).expect("serialize");
        let decoded: Value = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(decoded, value);
    }
}

//! Static type algebra consumed by the migration engine.
//!
//! The variant set is closed: every traversal matches exhaustively, so adding a
//! variant forces each rewrite site to handle it. Types are finite trees and
//! never reference themselves through this representation.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Qualified identifier of a nominal type (e.g. `A.0000000000000001.Vault`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeId(String);

impl TypeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Qualified identifier of an entitlement declaration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntitlementId(String);

impl EntitlementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntitlementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the members of an entitlement set combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetKind {
    /// All entitlements are granted (`auth(A, B)`).
    Conjunction,
    /// Any one of the entitlements is granted (`auth(A | B)`).
    Disjunction,
}

/// A non-empty set of entitlements.
///
/// An empty set is not representable: it must be expressed as
/// [`Authorization::Unauthorized`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawEntitlementSet")]
pub struct EntitlementSet {
    kind: SetKind,
    entitlements: BTreeSet<EntitlementId>,
}

#[derive(Deserialize)]
struct RawEntitlementSet {
    kind: SetKind,
    entitlements: BTreeSet<EntitlementId>,
}

impl TryFrom<RawEntitlementSet> for EntitlementSet {
    type Error = String;

    fn try_from(raw: RawEntitlementSet) -> Result<Self, Self::Error> {
        Self::new(raw.kind, raw.entitlements)
            .ok_or_else(|| "entitlement set must not be empty".to_string())
    }
}

impl EntitlementSet {
    /// Build a set, returning `None` when `entitlements` is empty.
    pub fn new(kind: SetKind, entitlements: BTreeSet<EntitlementId>) -> Option<Self> {
        if entitlements.is_empty() {
            return None;
        }
        Some(Self { kind, entitlements })
    }

    pub fn kind(&self) -> SetKind {
        self.kind
    }

    pub fn entitlements(&self) -> &BTreeSet<EntitlementId> {
        &self.entitlements
    }
}

impl fmt::Display for EntitlementSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let separator = match self.kind {
            SetKind::Conjunction => ", ",
            SetKind::Disjunction => " | ",
        };
        let names: Vec<&str> = self.entitlements.iter().map(EntitlementId::as_str).collect();
        write!(f, "auth({})", names.join(separator))
    }
}

/// Access qualifier on a reference type or reference value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "access")]
pub enum Authorization {
    Unauthorized,
    Entitlements(EntitlementSet),
}

impl Authorization {
    /// Authorization for `entitlements`, collapsing an empty set to `Unauthorized`.
    pub fn from_entitlements(kind: SetKind, entitlements: BTreeSet<EntitlementId>) -> Self {
        match EntitlementSet::new(kind, entitlements) {
            Some(set) => Self::Entitlements(set),
            None => Self::Unauthorized,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

/// Closed set of static types understood by the migration engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StaticType {
    Reference {
        authorization: Authorization,
        referenced: Box<StaticType>,
    },
    Optional {
        inner: Box<StaticType>,
    },
    Capability {
        borrow_type: Box<StaticType>,
    },
    VariableArray {
        element: Box<StaticType>,
    },
    ConstantArray {
        element: Box<StaticType>,
        size: u64,
    },
    Dictionary {
        key: Box<StaticType>,
        value: Box<StaticType>,
    },
    /// Any other nominal or primitive type; opaque to the engine.
    Leaf { id: TypeId },
}

impl StaticType {
    pub fn leaf(id: impl Into<String>) -> Self {
        Self::Leaf {
            id: TypeId::new(id),
        }
    }

    pub fn reference(authorization: Authorization, referenced: StaticType) -> Self {
        Self::Reference {
            authorization,
            referenced: Box::new(referenced),
        }
    }

    pub fn unauthorized_reference(referenced: StaticType) -> Self {
        Self::reference(Authorization::Unauthorized, referenced)
    }

    pub fn optional(inner: StaticType) -> Self {
        Self::Optional {
            inner: Box::new(inner),
        }
    }

    pub fn capability(borrow_type: StaticType) -> Self {
        Self::Capability {
            borrow_type: Box::new(borrow_type),
        }
    }

    pub fn variable_array(element: StaticType) -> Self {
        Self::VariableArray {
            element: Box::new(element),
        }
    }

    pub fn constant_array(element: StaticType, size: u64) -> Self {
        Self::ConstantArray {
            element: Box::new(element),
            size,
        }
    }

    pub fn dictionary(key: StaticType, value: StaticType) -> Self {
        Self::Dictionary {
            key: Box::new(key),
            value: Box::new(value),
        }
    }

    /// Short variant label used in diagnostics.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Reference { .. } => "reference",
            Self::Optional { .. } => "optional",
            Self::Capability { .. } => "capability",
            Self::VariableArray { .. } => "variable_array",
            Self::ConstantArray { .. } => "constant_array",
            Self::Dictionary { .. } => "dictionary",
            Self::Leaf { .. } => "leaf",
        }
    }
}

impl fmt::Display for StaticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference {
                authorization: Authorization::Unauthorized,
                referenced,
            } => write!(f, "&{referenced}"),
            Self::Reference {
                authorization: Authorization::Entitlements(set),
                referenced,
            } => write!(f, "{set} &{referenced}"),
            Self::Optional { inner } => write!(f, "{inner}?"),
            Self::Capability { borrow_type } => write!(f, "Capability<{borrow_type}>"),
            Self::VariableArray { element } => write!(f, "[{element}]"),
            Self::ConstantArray { element, size } => write!(f, "[{element}; {size}]"),
            Self::Dictionary { key, value } => write!(f, "{{{key}: {value}}}"),
            Self::Leaf { id } => write!(f, "{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> BTreeSet<EntitlementId> {
        names.iter().map(|name| EntitlementId::new(*name)).collect()
    }

    #[test]
    fn empty_entitlement_set_collapses_to_unauthorized() {
        assert_eq!(
            Authorization::from_entitlements(SetKind::Conjunction, BTreeSet::new()),
            Authorization::Unauthorized
        );
        assert!(EntitlementSet::new(SetKind::Disjunction, BTreeSet::new()).is_none());
    }

    #[test]
    fn deserializing_empty_entitlement_set_is_rejected() {
        let raw = r#"{"access":"entitlements","kind":"conjunction","entitlements":[]}"#;
        assert!(serde_json::from_str::<Authorization>(raw).is_err());
    }

    #[test]
    fn display_renders_nested_types() {
        let auth = Authorization::from_entitlements(SetKind::Conjunction, ids(&["E1", "E2"]));
        let ty = StaticType::dictionary(
            StaticType::leaf("String"),
            StaticType::optional(StaticType::reference(auth, StaticType::leaf("T"))),
        );
        assert_eq!(ty.to_string(), "{String: auth(E1, E2) &T?}");

        let cap = StaticType::capability(StaticType::unauthorized_reference(
            StaticType::constant_array(StaticType::leaf("Int"), 3),
        ));
        assert_eq!(cap.to_string(), "Capability<&[Int; 3]>");
    }

    #[test]
    fn static_type_json_shape_is_tagged() {
        let ty = StaticType::unauthorized_reference(StaticType::leaf("T"));
        let json = serde_json::to_value(&ty).expect("serialize");
        assert_eq!(json["kind"], "reference");
        assert_eq!(json["authorization"]["access"], "unauthorized");
        assert_eq!(json["referenced"]["kind"], "leaf");
        assert_eq!(json["referenced"]["id"], "T");
    }
}

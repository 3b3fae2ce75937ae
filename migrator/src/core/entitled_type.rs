//! Conversion of unauthorized reference types into entitled reference types.
//!
//! Rules, first match wins:
//! - `&T` becomes `auth(Entitlements(T')) &T'` where `T'` is the converted `T`;
//!   an empty or unavailable entitlement set keeps the reference unauthorized.
//! - An already authorized reference is returned unchanged, inner type included.
//! - `T?`, `Capability<T>`, `[T]`, `[T; N]` and `{K: V}` convert their
//!   component types and keep their shape.
//! - Leaf types are returned unchanged.
//!
//! Because authorized references are never re-descended, applying the
//! conversion twice yields the result of applying it once. The flip side is a
//! staleness window: if a type's supported entitlements grow after a reference
//! to it was authorized, that reference keeps the old set.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::error::{InferenceError, MigrationError};
use crate::core::types::{Authorization, EntitlementId, SetKind, StaticType, TypeId};

/// Read-only query answering which entitlements a type supports.
///
/// Implementations must be free of side effects; the driver calls them from
/// several worker threads at once.
pub trait EntitlementInference: Send + Sync {
    /// Entitlements supported by `ty`, or `None` if `ty` does not expose the
    /// entitlement-supporting capability.
    fn supported_entitlements(
        &self,
        ty: &StaticType,
    ) -> Result<Option<BTreeSet<EntitlementId>>, InferenceError>;
}

/// Inference backed by a static table of nominal types.
///
/// Only leaf types listed in the catalog support entitlements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntitlementCatalog {
    types: BTreeMap<TypeId, BTreeSet<EntitlementId>>,
}

impl EntitlementCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that `ty` supports `entitlements` (replacing any prior entry).
    pub fn declare<I, E>(&mut self, ty: impl Into<String>, entitlements: I)
    where
        I: IntoIterator<Item = E>,
        E: Into<String>,
    {
        let set = entitlements.into_iter().map(EntitlementId::new).collect();
        self.types.insert(TypeId::new(ty), set);
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl EntitlementInference for EntitlementCatalog {
    fn supported_entitlements(
        &self,
        ty: &StaticType,
    ) -> Result<Option<BTreeSet<EntitlementId>>, InferenceError> {
        match ty {
            StaticType::Leaf { id } => Ok(self.types.get(id).cloned()),
            _ => Ok(None),
        }
    }
}

/// Pure recursive rewrite of static types.
pub struct EntitledTypeConverter<'a, I: EntitlementInference + ?Sized> {
    inference: &'a I,
}

impl<'a, I: EntitlementInference + ?Sized> EntitledTypeConverter<'a, I> {
    pub fn new(inference: &'a I) -> Self {
        Self { inference }
    }

    /// Migrated form of `ty`.
    ///
    /// Only fails when the inference query itself fails.
    pub fn convert(&self, ty: &StaticType) -> Result<StaticType, MigrationError> {
        match ty {
            StaticType::Reference {
                authorization: Authorization::Unauthorized,
                referenced,
            } => {
                let referenced = self.convert(referenced)?;
                let authorization = self.authorization_for(&referenced)?;
                Ok(StaticType::reference(authorization, referenced))
            }
            StaticType::Reference {
                authorization: Authorization::Entitlements(_),
                ..
            } => Ok(ty.clone()),
            StaticType::Optional { inner } => Ok(StaticType::optional(self.convert(inner)?)),
            StaticType::Capability { borrow_type } => {
                Ok(StaticType::capability(self.convert(borrow_type)?))
            }
            StaticType::VariableArray { element } => {
                Ok(StaticType::variable_array(self.convert(element)?))
            }
            StaticType::ConstantArray { element, size } => {
                Ok(StaticType::constant_array(self.convert(element)?, *size))
            }
            StaticType::Dictionary { key, value } => Ok(StaticType::dictionary(
                self.convert(key)?,
                self.convert(value)?,
            )),
            StaticType::Leaf { .. } => Ok(ty.clone()),
        }
    }

    fn authorization_for(&self, referenced: &StaticType) -> Result<Authorization, MigrationError> {
        let supported = self
            .inference
            .supported_entitlements(referenced)
            .map_err(|source| MigrationError::CapabilityResolution {
                ty: referenced.to_string(),
                source,
            })?;
        Ok(match supported {
            Some(entitlements) => Authorization::from_entitlements(SetKind::Conjunction, entitlements),
            None => Authorization::Unauthorized,
        })
    }
}

/// Convenience wrapper around [`EntitledTypeConverter::convert`].
pub fn convert_to_entitled_type<I: EntitlementInference + ?Sized>(
    ty: &StaticType,
    inference: &I,
) -> Result<StaticType, MigrationError> {
    EntitledTypeConverter::new(inference).convert(ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{catalog, entitled};
    use proptest::prelude::*;

    fn t() -> StaticType {
        StaticType::leaf("T")
    }

    fn convert(ty: &StaticType) -> StaticType {
        convert_to_entitled_type(ty, &catalog(&[("T", &["E1", "E2"]), ("U", &[])]))
            .expect("convert")
    }

    #[test]
    fn leaf_types_are_unchanged() {
        assert_eq!(convert(&t()), t());
        assert_eq!(convert(&StaticType::leaf("Int")), StaticType::leaf("Int"));
    }

    #[test]
    fn unauthorized_reference_gains_supported_entitlements() {
        let ty = StaticType::unauthorized_reference(t());
        assert_eq!(convert(&ty), StaticType::reference(entitled(&["E1", "E2"]), t()));
    }

    #[test]
    fn capability_borrow_type_is_converted() {
        let ty = StaticType::capability(StaticType::unauthorized_reference(t()));
        assert_eq!(
            convert(&ty),
            StaticType::capability(StaticType::reference(entitled(&["E1", "E2"]), t()))
        );
    }

    #[test]
    fn array_element_types_are_converted_and_size_kept() {
        let ty = StaticType::variable_array(StaticType::unauthorized_reference(t()));
        assert_eq!(
            convert(&ty),
            StaticType::variable_array(StaticType::reference(entitled(&["E1", "E2"]), t()))
        );

        let ty = StaticType::constant_array(StaticType::unauthorized_reference(t()), 4);
        assert_eq!(
            convert(&ty),
            StaticType::constant_array(StaticType::reference(entitled(&["E1", "E2"]), t()), 4)
        );
    }

    #[test]
    fn dictionary_value_type_is_converted_and_key_kept() {
        let ty = StaticType::dictionary(
            StaticType::leaf("K"),
            StaticType::unauthorized_reference(t()),
        );
        assert_eq!(
            convert(&ty),
            StaticType::dictionary(
                StaticType::leaf("K"),
                StaticType::reference(entitled(&["E1", "E2"]), t())
            )
        );
    }

    #[test]
    fn empty_supported_set_keeps_reference_unauthorized() {
        let ty = StaticType::unauthorized_reference(StaticType::leaf("U"));
        assert_eq!(convert(&ty), ty);
        let ty = StaticType::unauthorized_reference(StaticType::leaf("Unknown"));
        assert_eq!(convert(&ty), ty);
    }

    #[test]
    fn authorized_reference_is_a_fixed_point() {
        // Inner reference would convert if it were visited.
        let inner = StaticType::unauthorized_reference(t());
        let ty = StaticType::reference(entitled(&["Old"]), StaticType::optional(inner));
        assert_eq!(convert(&ty), ty);
    }

    #[test]
    fn nested_reference_converts_inner_before_inference() {
        // &&T: inner becomes auth(E1, E2) &T, which is not itself entitlement-supporting.
        let ty = StaticType::unauthorized_reference(StaticType::unauthorized_reference(t()));
        assert_eq!(
            convert(&ty),
            StaticType::unauthorized_reference(StaticType::reference(
                entitled(&["E1", "E2"]),
                t()
            ))
        );
    }

    #[test]
    fn inference_failure_is_a_capability_resolution_error() {
        struct Offline;
        impl EntitlementInference for Offline {
            fn supported_entitlements(
                &self,
                _ty: &StaticType,
            ) -> Result<Option<BTreeSet<EntitlementId>>, InferenceError> {
                Err(InferenceError::Unavailable("offline".to_string()))
            }
        }

        let err = convert_to_entitled_type(&StaticType::unauthorized_reference(t()), &Offline)
            .expect_err("inference fails");
        assert!(matches!(err, MigrationError::CapabilityResolution { .. }));
        // Types without references never consult inference.
        assert_eq!(
            convert_to_entitled_type(&StaticType::variable_array(t()), &Offline).expect("leaf"),
            StaticType::variable_array(t())
        );
    }

    fn arb_type() -> impl Strategy<Value = StaticType> {
        let leaf = prop_oneof![
            Just(StaticType::leaf("T")),
            Just(StaticType::leaf("U")),
            Just(StaticType::leaf("Int")),
        ];
        leaf.prop_recursive(5, 48, 2, |inner| {
            prop_oneof![
                inner.clone().prop_map(StaticType::unauthorized_reference),
                inner
                    .clone()
                    .prop_map(|ty| StaticType::reference(entitled(&["X"]), ty)),
                inner.clone().prop_map(StaticType::optional),
                inner.clone().prop_map(StaticType::capability),
                inner.clone().prop_map(StaticType::variable_array),
                (inner.clone(), 0u64..8).prop_map(|(ty, n)| StaticType::constant_array(ty, n)),
                (inner.clone(), inner).prop_map(|(k, v)| StaticType::dictionary(k, v)),
            ]
        })
    }

    proptest! {
        /// Converting twice is the same as converting once.
        #[test]
        fn conversion_is_idempotent(ty in arb_type()) {
            let once = convert(&ty);
            let twice = convert(&once);
            prop_assert_eq!(once, twice);
        }

        /// Authorized references come back untouched whatever they wrap.
        #[test]
        fn authorized_references_are_fixed_points(ty in arb_type()) {
            let authorized = StaticType::reference(entitled(&["E9"]), ty);
            prop_assert_eq!(convert(&authorized), authorized);
        }
    }
}

//! Error taxonomy for type and value migration.
//!
//! Every variant except [`MigrationError::Fatal`] is recovered at the
//! granularity of one storage entry: the driver records it against the entry
//! key and moves on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::value::SlotId;

/// Failure of the entitlement inference query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    /// The inference service cannot answer at all.
    #[error("entitlement inference unavailable: {0}")]
    Unavailable(String),
    /// The query failed for one specific type.
    #[error("entitlement inference failed for {ty}: {reason}")]
    Failed { ty: String, reason: String },
}

/// Recoverable (per entry) or fatal (per run) migration failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrationError {
    /// A type variant combination the type migrator does not recognize.
    #[error("type conversion failed for {ty}: {reason}")]
    TypeConversion { ty: String, reason: String },

    /// A value's runtime shape disagrees with its declared static type.
    #[error("value shape mismatch at {path}: expected {expected}, found {found}")]
    ValueShapeMismatch {
        path: String,
        expected: String,
        found: String,
    },

    /// A rewrite would duplicate or silently drop a resource-kinded value.
    #[error("resource linearity violation at {path}{}: {reason}", slot_suffix(.slot))]
    ResourceLinearityViolation {
        path: String,
        slot: Option<SlotId>,
        reason: String,
    },

    /// The entitlement inference query failed for a type that required it.
    #[error("capability resolution failed for {ty}: {source}")]
    CapabilityResolution {
        ty: String,
        #[source]
        source: InferenceError,
    },

    /// Registry or storage level failure; aborts the whole run.
    #[error("fatal migration error: {reason}")]
    Fatal { reason: String },
}

fn slot_suffix(slot: &Option<SlotId>) -> String {
    slot.map(|slot| format!(" ({slot})")).unwrap_or_default()
}

/// Stable classification of [`MigrationError`] used in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TypeConversion,
    ValueShapeMismatch,
    ResourceLinearityViolation,
    CapabilityResolution,
    Fatal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TypeConversion => "type_conversion",
            Self::ValueShapeMismatch => "value_shape_mismatch",
            Self::ResourceLinearityViolation => "resource_linearity_violation",
            Self::CapabilityResolution => "capability_resolution",
            Self::Fatal => "fatal",
        }
    }
}

impl MigrationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TypeConversion { .. } => ErrorKind::TypeConversion,
            Self::ValueShapeMismatch { .. } => ErrorKind::ValueShapeMismatch,
            Self::ResourceLinearityViolation { .. } => ErrorKind::ResourceLinearityViolation,
            Self::CapabilityResolution { .. } => ErrorKind::CapabilityResolution,
            Self::Fatal { .. } => ErrorKind::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    pub(crate) fn shape(path: &str, expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::ValueShapeMismatch {
            path: path.to_string(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub(crate) fn linearity(path: &str, slot: Option<SlotId>, reason: impl Into<String>) -> Self {
        Self::ResourceLinearityViolation {
            path: path.to_string(),
            slot,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_fatal_errors_are_fatal() {
        let fatal = MigrationError::Fatal {
            reason: "storage gone".to_string(),
        };
        assert!(fatal.is_fatal());
        assert!(!MigrationError::shape("$", "optional", "array").is_fatal());
    }

    #[test]
    fn linearity_message_includes_slot_when_known() {
        let err = MigrationError::linearity("$.vault", Some(SlotId::new(4)), "second owner");
        assert_eq!(
            err.to_string(),
            "resource linearity violation at $.vault (slot#4): second owner"
        );
        let err = MigrationError::linearity("$[0]", None, "key collision");
        assert_eq!(
            err.to_string(),
            "resource linearity violation at $[0]: key collision"
        );
    }
}

//! Resource ownership census over a value tree.
//!
//! Counts owning positions only: composite fields, optional contents, array
//! elements and dictionary keys/values. References and capabilities identify
//! their targets without owning them and are not followed.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::value::{SlotId, Value};
use crate::core::value_migrator::ROOT_PATH;

/// Owning positions of every resource slot reachable from a value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceCensus {
    owners: BTreeMap<SlotId, Vec<String>>,
}

impl ResourceCensus {
    /// Distinct resource slots reachable from the root.
    pub fn slots(&self) -> BTreeSet<SlotId> {
        self.owners.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Human-readable violations: slots owned from more than one position.
    pub fn violations(&self) -> Vec<String> {
        self.owners
            .iter()
            .filter(|(_, paths)| paths.len() > 1)
            .map(|(slot, paths)| format!("{slot} owned at {}", paths.join(", ")))
            .collect()
    }
}

/// Take the resource census of `root`.
pub fn resource_census(root: &Value) -> ResourceCensus {
    let mut census = ResourceCensus::default();
    count_value(root, ROOT_PATH, &mut census.owners);
    census
}

/// Compare the census before and after a rewrite.
///
/// Returns an empty list when the rewrite neither duplicated nor dropped a
/// resource.
pub fn compare_census(before: &ResourceCensus, after: &ResourceCensus) -> Vec<String> {
    let before_slots = before.slots();
    let after_slots = after.slots();
    let mut errors = Vec::new();
    for dropped in before_slots.difference(&after_slots) {
        errors.push(format!("{dropped} dropped by migration"));
    }
    for created in after_slots.difference(&before_slots) {
        errors.push(format!("{created} created by migration"));
    }
    errors.extend(after.violations());
    errors
}

fn count_value(value: &Value, path: &str, owners: &mut BTreeMap<SlotId, Vec<String>>) {
    if let Some(slot) = value.slot()
        && value.is_resource_kinded()
    {
        let paths = owners.entry(slot).or_default();
        paths.push(path.to_string());
        // A second owner was already recorded; its subtree was counted once.
        if paths.len() > 1 {
            return;
        }
    }

    match value {
        Value::Composite(composite) => {
            for field in &composite.fields {
                count_value(&field.value, &format!("{path}.{}", field.name), owners);
            }
        }
        Value::Optional(optional) => {
            if let Some(inner) = &optional.inner {
                count_value(inner, &format!("{path}?"), owners);
            }
        }
        Value::Array(array) => {
            for (index, element) in array.elements.iter().enumerate() {
                count_value(element, &format!("{path}[{index}]"), owners);
            }
        }
        Value::Dictionary(dictionary) => {
            for (index, entry) in dictionary.entries.iter().enumerate() {
                count_value(&entry.key, &format!("{path}<key {index}>"), owners);
                count_value(&entry.value, &format!("{path}[{index}]"), owners);
            }
        }
        Value::Capability(_) | Value::Reference(_) | Value::Type(_) | Value::Primitive(_) => {}
    }
}

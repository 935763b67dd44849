// SPDX-License-Identifier: GPL-3.0-only

//! Probe normalization for both API generations
//!
//! Generation-1 drivers expose capabilities as a flat list of string
//! key/value descriptors with vendor-specific naming; Generation-2 drivers
//! expose strongly typed characteristic entries. Both normalize into the same
//! [`CapabilitySet`] so callers never branch on API generation. A vendor
//! feature missing from the probe is simply absent, never an error.

use super::{CapabilitySet, Parameter, ParameterRange, ParameterValue};
use std::collections::HashMap;
use tracing::debug;

/// One typed capability entry as reported by a Generation-2 driver
#[derive(Debug, Clone, PartialEq)]
pub struct Characteristic {
    pub key: String,
    pub default: ParameterValue,
    pub range: ParameterRange,
}

/// Legacy descriptor suffixes. A key `iso` may be accompanied by
/// `iso-values` (menu csv) or `iso-min`/`iso-max`/`iso-step` (integer range);
/// the base entry carries the current value.
const SUFFIX_VALUES: &str = "-values";
const SUFFIX_MIN: &str = "-min";
const SUFFIX_MAX: &str = "-max";
const SUFFIX_STEP: &str = "-step";

fn is_descriptor_suffix(key: &str) -> bool {
    key.ends_with(SUFFIX_VALUES)
        || key.ends_with(SUFFIX_MIN)
        || key.ends_with(SUFFIX_MAX)
        || key.ends_with(SUFFIX_STEP)
}

/// Normalize a Generation-1 flat descriptor list.
///
/// Duplicate base keys keep the last occurrence, matching how legacy drivers
/// override earlier entries in their parameter lists.
pub fn from_legacy_descriptors(descriptors: &[(String, String)]) -> CapabilitySet {
    let map: HashMap<&str, &str> = descriptors
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let mut capabilities = CapabilitySet::new();
    for (key, raw) in descriptors {
        if is_descriptor_suffix(key) {
            continue;
        }

        let default = ParameterValue::parse_lossy(raw);
        let range = legacy_range_for(key, &default, &map);
        debug!(key = %key, range = %range, "Normalized legacy parameter");
        capabilities.insert(Parameter::new(key, default, range));
    }
    capabilities
}

/// Derive the range for one legacy base key from its companion descriptors
fn legacy_range_for(
    key: &str,
    default: &ParameterValue,
    map: &HashMap<&str, &str>,
) -> ParameterRange {
    if let Some(csv) = map.get(format!("{}{}", key, SUFFIX_VALUES).as_str()) {
        let items: Vec<ParameterValue> = csv
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ParameterValue::parse_lossy)
            .collect();
        if !items.is_empty() {
            return ParameterRange::Menu(items);
        }
    }

    let min = map
        .get(format!("{}{}", key, SUFFIX_MIN).as_str())
        .and_then(|v| v.trim().parse::<i64>().ok());
    let max = map
        .get(format!("{}{}", key, SUFFIX_MAX).as_str())
        .and_then(|v| v.trim().parse::<i64>().ok());
    if let (Some(min), Some(max)) = (min, max) {
        let step = map
            .get(format!("{}{}", key, SUFFIX_STEP).as_str())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|s| *s >= 1)
            .unwrap_or(1);
        return ParameterRange::Int { min, max, step };
    }

    // No companion descriptors: infer the loosest range from the value type
    match default {
        ParameterValue::Bool(_) => ParameterRange::Bool,
        ParameterValue::Int(v) => ParameterRange::Int {
            min: *v,
            max: *v,
            step: 1,
        },
        ParameterValue::Float(v) => ParameterRange::Float { min: *v, max: *v },
        ParameterValue::Text(_) => ParameterRange::Text,
    }
}

/// Normalize Generation-2 typed characteristics. Direct mapping; the typed
/// entries already have the shape the model wants.
pub fn from_characteristics(entries: &[Characteristic]) -> CapabilitySet {
    let mut capabilities = CapabilitySet::new();
    for entry in entries {
        capabilities.insert(Parameter::new(
            &entry.key,
            entry.default.clone(),
            entry.range.clone(),
        ));
    }
    capabilities
}

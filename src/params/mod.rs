// SPDX-License-Identifier: GPL-3.0-only

//! Capability/parameter model
//!
//! Discovers, at device-open time, which parameters a device supports and
//! their legal ranges, and exposes one uniform shape regardless of which API
//! generation produced them. Capability metadata is immutable after probe;
//! *current values* live in a synchronized [`ParameterStore`] because reads
//! and hardware-acknowledged writes race across execution contexts.

pub mod normalize;

use crate::errors::{CameraError, CameraResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// A typed parameter value.
///
/// Generation-1 drivers speak strings on the wire; Generation-2 drivers speak
/// typed values. Both normalize into this shape so callers never branch on
/// API generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl ParameterValue {
    /// Parse a legacy wire string into the closest typed value.
    /// Never fails; unparseable input stays text.
    pub fn parse_lossy(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(v) = trimmed.parse::<i64>() {
            return ParameterValue::Int(v);
        }
        if let Ok(v) = trimmed.parse::<f64>() {
            return ParameterValue::Float(v);
        }
        match trimmed {
            "true" | "on" => ParameterValue::Bool(true),
            "false" | "off" => ParameterValue::Bool(false),
            _ => ParameterValue::Text(trimmed.to_string()),
        }
    }

    /// Render the value as a legacy wire string
    pub fn to_wire(&self) -> String {
        match self {
            ParameterValue::Int(v) => v.to_string(),
            ParameterValue::Float(v) => v.to_string(),
            ParameterValue::Bool(v) => v.to_string(),
            ParameterValue::Text(v) => v.clone(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParameterValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParameterValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        ParameterValue::Int(v)
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        ParameterValue::Bool(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        ParameterValue::Text(v.to_string())
    }
}

/// Permissible range or enumerated set for a parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterRange {
    /// Closed integer range with step alignment (step >= 1)
    Int { min: i64, max: i64, step: i64 },
    /// Closed floating-point range
    Float { min: f64, max: f64 },
    /// Enumerated set of permitted values
    Menu(Vec<ParameterValue>),
    /// Boolean toggle
    Bool,
    /// Unconstrained text
    Text,
}

impl ParameterRange {
    /// Whether a value lies within the declared bounds
    pub fn contains(&self, value: &ParameterValue) -> bool {
        match (self, value) {
            (ParameterRange::Int { min, max, .. }, ParameterValue::Int(v)) => {
                *v >= *min && *v <= *max
            }
            (ParameterRange::Float { min, max }, ParameterValue::Float(v)) => {
                *v >= *min && *v <= *max
            }
            (ParameterRange::Float { min, max }, ParameterValue::Int(v)) => {
                (*v as f64) >= *min && (*v as f64) <= *max
            }
            (ParameterRange::Menu(items), v) => items.contains(v),
            (ParameterRange::Bool, ParameterValue::Bool(_)) => true,
            (ParameterRange::Text, ParameterValue::Text(_)) => true,
            _ => false,
        }
    }

    /// Align an in-bounds value to the declared step before it is forwarded
    /// to hardware. Values outside the bounds are rejected upstream with
    /// `OutOfRange`; this only snaps stepped integers onto the grid so the
    /// driver never sees a value it did not advertise.
    pub fn align(&self, value: ParameterValue) -> ParameterValue {
        match (self, &value) {
            (ParameterRange::Int { min, max, step }, ParameterValue::Int(v)) if *step > 1 => {
                let snapped = min + ((v - min) / step) * step;
                ParameterValue::Int(snapped.clamp(*min, *max))
            }
            _ => value,
        }
    }
}

impl fmt::Display for ParameterRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterRange::Int { min, max, step } => write!(f, "[{}..{} step {}]", min, max, step),
            ParameterRange::Float { min, max } => write!(f, "[{}..{}]", min, max),
            ParameterRange::Menu(items) => {
                let names: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "{{{}}}", names.join(", "))
            }
            ParameterRange::Bool => write!(f, "{{true, false}}"),
            ParameterRange::Text => write!(f, "<text>"),
        }
    }
}

/// A single controllable camera setting
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Normalized key (see [`crate::constants::keys`]) or vendor key as probed
    pub key: String,
    /// Value reported by the device at probe time
    pub default: ParameterValue,
    /// Permissible range or enumerated set
    pub range: ParameterRange,
    /// False when the key is known but hidden/inoperable on this device.
    /// Unsupported parameters must never be written.
    pub supported: bool,
}

impl Parameter {
    pub fn new(key: &str, default: ParameterValue, range: ParameterRange) -> Self {
        Self {
            key: key.to_string(),
            default,
            range,
            supported: true,
        }
    }
}

/// The per-device, per-session set of supported parameters.
///
/// Populated once at open time and immutable thereafter; quirk overlays layer
/// on top of it without mutating it (see [`crate::quirks`]).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilitySet {
    parameters: HashMap<String, Parameter>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a probed parameter. Last insert wins for duplicate keys, which
    /// matters for Generation-1 lists where vendors repeat keys.
    pub fn insert(&mut self, parameter: Parameter) {
        self.parameters.insert(parameter.key.clone(), parameter);
    }

    pub fn remove(&mut self, key: &str) -> Option<Parameter> {
        self.parameters.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Parameter> {
        self.parameters.get(key)
    }

    pub fn is_supported(&self, key: &str) -> bool {
        self.parameters.get(key).is_some_and(|p| p.supported)
    }

    /// Validate a prospective write. Returns the step-aligned value to be
    /// forwarded to hardware, or the synchronous error the caller must see.
    pub fn validate(&self, key: &str, value: ParameterValue) -> CameraResult<ParameterValue> {
        let parameter = self
            .parameters
            .get(key)
            .ok_or_else(|| CameraError::NotSupported(key.to_string()))?;
        if !parameter.supported {
            return Err(CameraError::NotSupported(key.to_string()));
        }
        if !parameter.range.contains(&value) {
            return Err(CameraError::OutOfRange {
                key: key.to_string(),
                value: value.to_wire(),
            });
        }
        Ok(parameter.range.align(value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.values()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

/// Synchronized store for the current values of writable parameters.
///
/// The device context records hardware-acknowledged writes here; any context
/// may read. Keyed by normalized parameter key.
#[derive(Debug, Default)]
pub struct ParameterStore {
    values: Mutex<HashMap<String, ParameterValue>>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed defaults from a freshly probed capability set
    pub fn seed(&self, capabilities: &CapabilitySet) {
        let mut values = self.values.lock().unwrap();
        values.clear();
        for parameter in capabilities.iter() {
            if parameter.supported {
                values.insert(parameter.key.clone(), parameter.default.clone());
            }
        }
    }

    /// Record a hardware-acknowledged write
    pub fn record(&self, key: &str, value: ParameterValue) {
        self.values.lock().unwrap().insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<ParameterValue> {
        self.values.lock().unwrap().get(key).cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, ParameterValue> {
        self.values.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.values.lock().unwrap().clear();
    }
}

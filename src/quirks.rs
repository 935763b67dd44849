// SPDX-License-Identifier: GPL-3.0-only

//! Device-quirk registry
//!
//! Vendors ship cameras whose real control surface diverges from what the
//! standard capability enumeration reports: extra manufacturer keys, controls
//! that exist but misbehave, standard features hidden behind vendor naming.
//! Quirks are declaratively registered overlays selected once at device-open
//! time by specificity (exact model > chipset family > vendor default >
//! generic) and layered read-through on top of the probed capability set.
//! The base set is never mutated; the overlay is discarded on close.

use crate::params::{CapabilitySet, Parameter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Identity of a physical camera as reported by the driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub vendor: String,
    pub model: String,
    pub chipset: String,
}

impl DeviceIdentity {
    pub fn new(vendor: &str, model: &str, chipset: &str) -> Self {
        Self {
            vendor: vendor.to_string(),
            model: model.to_string(),
            chipset: chipset.to_string(),
        }
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.vendor, self.model, self.chipset)
    }
}

/// Match scope of a quirk, ordered by specificity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuirkScope {
    /// Exact manufacturer + model match
    Exact { vendor: String, model: String },
    /// Chipset family match (e.g. one ISP shared by many models)
    Chipset(String),
    /// All devices of one vendor
    Vendor(String),
    /// Applies to every device
    Generic,
}

impl QuirkScope {
    /// Higher wins when two quirks touch the same parameter key
    pub fn specificity(&self) -> u8 {
        match self {
            QuirkScope::Exact { .. } => 3,
            QuirkScope::Chipset(_) => 2,
            QuirkScope::Vendor(_) => 1,
            QuirkScope::Generic => 0,
        }
    }

    pub fn matches(&self, identity: &DeviceIdentity) -> bool {
        match self {
            QuirkScope::Exact { vendor, model } => {
                vendor.eq_ignore_ascii_case(&identity.vendor)
                    && model.eq_ignore_ascii_case(&identity.model)
            }
            QuirkScope::Chipset(chipset) => chipset.eq_ignore_ascii_case(&identity.chipset),
            QuirkScope::Vendor(vendor) => vendor.eq_ignore_ascii_case(&identity.vendor),
            QuirkScope::Generic => true,
        }
    }
}

/// One override carried by a quirk
#[derive(Debug, Clone, PartialEq)]
pub enum QuirkAction {
    /// Expose a parameter the standard enumeration misses
    Add(Parameter),
    /// Mark a probed parameter unsupported (present but must never be written)
    Hide(String),
    /// Surface a vendor key under its normalized standard name; writes to the
    /// standard key are forwarded to the vendor key on the wire
    Remap {
        vendor_key: String,
        standard_key: String,
    },
}

/// A vendor/model-scoped override set
#[derive(Debug, Clone)]
pub struct DeviceQuirk {
    pub scope: QuirkScope,
    pub actions: Vec<QuirkAction>,
}

impl DeviceQuirk {
    pub fn new(scope: QuirkScope) -> Self {
        Self {
            scope,
            actions: Vec::new(),
        }
    }

    pub fn add(mut self, parameter: Parameter) -> Self {
        self.actions.push(QuirkAction::Add(parameter));
        self
    }

    pub fn hide(mut self, key: &str) -> Self {
        self.actions.push(QuirkAction::Hide(key.to_string()));
        self
    }

    pub fn remap(mut self, vendor_key: &str, standard_key: &str) -> Self {
        self.actions.push(QuirkAction::Remap {
            vendor_key: vendor_key.to_string(),
            standard_key: standard_key.to_string(),
        });
        self
    }
}

/// Flattened override set for one device, resolution output of the registry.
///
/// Resolution is deterministic: quirks are folded in ascending specificity
/// (registration order breaking ties), and each fold replaces whatever an
/// earlier quirk said about the same parameter key. A more specific add on a
/// key therefore undoes a generic hide of it, not just a generic add.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuirkOverlay {
    // Last folded action per affected key. For remaps the affected key is
    // the standard key the parameter surfaces under.
    per_key: HashMap<String, QuirkAction>,
}

impl QuirkOverlay {
    pub fn is_empty(&self) -> bool {
        self.per_key.is_empty()
    }

    fn fold(&mut self, action: &QuirkAction) {
        let key = match action {
            QuirkAction::Add(parameter) => parameter.key.clone(),
            QuirkAction::Hide(key) => key.clone(),
            QuirkAction::Remap { standard_key, .. } => standard_key.clone(),
        };
        self.per_key.insert(key, action.clone());
    }

    fn remaps(&self) -> impl Iterator<Item = (&str, &str)> {
        self.per_key.iter().filter_map(|(key, action)| match action {
            QuirkAction::Remap { vendor_key, .. } => Some((key.as_str(), vendor_key.as_str())),
            _ => None,
        })
    }

    fn additions(&self) -> impl Iterator<Item = &Parameter> {
        self.per_key.values().filter_map(|action| match action {
            QuirkAction::Add(parameter) => Some(parameter),
            _ => None,
        })
    }

    fn hidden(&self) -> impl Iterator<Item = &str> {
        self.per_key.values().filter_map(|action| match action {
            QuirkAction::Hide(key) => Some(key.as_str()),
            _ => None,
        })
    }
}

/// Additive registry of device quirks.
///
/// New device profiles are registered, never edited into shared logic. The
/// registry is consulted once per `open()`; the resolved overlay is cached on
/// the capture device for the session.
#[derive(Debug, Default)]
pub struct QuirkRegistry {
    quirks: Vec<DeviceQuirk>,
}

impl QuirkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-seeded with profiles for known devices
    pub fn builtin_profiles() -> Self {
        let mut registry = Self::new();

        // Vintage Optics rear sensors report ISO only through their vendor key
        registry.register(
            DeviceQuirk::new(QuirkScope::Vendor("vintage-optics".into()))
                .remap("vo-iso", crate::constants::keys::ISO),
        );

        // The photon-isp family advertises a zoom control its firmware ignores
        registry
            .register(DeviceQuirk::new(QuirkScope::Chipset("photon-isp".into())).hide("zoom-ratio"));

        registry
    }

    /// Register a quirk. Additive only; existing entries are never edited.
    pub fn register(&mut self, quirk: DeviceQuirk) {
        debug!(scope = ?quirk.scope, actions = quirk.actions.len(), "Registering device quirk");
        self.quirks.push(quirk);
    }

    /// Resolve the overlay for a device identity.
    ///
    /// Repeated lookups for the same identity return an identical overlay.
    pub fn resolve(&self, identity: &DeviceIdentity) -> QuirkOverlay {
        let mut matching: Vec<&DeviceQuirk> = self
            .quirks
            .iter()
            .filter(|q| q.scope.matches(identity))
            .collect();
        // Stable sort: ascending specificity, registration order preserved
        // within each tier, so folding leaves the most specific quirk on top.
        matching.sort_by_key(|q| q.scope.specificity());

        let mut overlay = QuirkOverlay::default();
        for quirk in matching {
            for action in &quirk.actions {
                overlay.fold(action);
            }
        }
        overlay
    }

    pub fn len(&self) -> usize {
        self.quirks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quirks.is_empty()
    }
}

/// The capability surface a session actually exposes: the probed base set
/// with a quirk overlay applied read-through at open time.
///
/// Materialized once per open; the base set is shared and untouched, so the
/// same device probed without quirks still yields the standard set.
#[derive(Debug, Clone)]
pub struct EffectiveCapabilities {
    base: Arc<CapabilitySet>,
    view: CapabilitySet,
    wire_keys: HashMap<String, String>,
}

impl EffectiveCapabilities {
    pub fn new(base: Arc<CapabilitySet>, overlay: &QuirkOverlay) -> Self {
        let mut view = (*base).clone();
        let mut wire_keys = HashMap::new();

        for (standard_key, vendor_key) in overlay.remaps() {
            if let Some(vendor_parameter) = view.remove(vendor_key) {
                let mut parameter = vendor_parameter;
                parameter.key = standard_key.to_string();
                view.insert(parameter);
                wire_keys.insert(standard_key.to_string(), vendor_key.to_string());
            }
        }

        for parameter in overlay.additions() {
            view.insert(parameter.clone());
        }

        for key in overlay.hidden() {
            if let Some(parameter) = view.remove(key) {
                let mut hidden = parameter;
                hidden.supported = false;
                view.insert(hidden);
            }
        }

        Self {
            base,
            view,
            wire_keys,
        }
    }

    /// Effective view without any quirks applied
    pub fn without_quirks(base: Arc<CapabilitySet>) -> Self {
        Self::new(base, &QuirkOverlay::default())
    }

    pub fn get(&self, key: &str) -> Option<&Parameter> {
        self.view.get(key)
    }

    pub fn is_supported(&self, key: &str) -> bool {
        self.view.is_supported(key)
    }

    /// Validate a prospective write against the effective view
    pub fn validate(
        &self,
        key: &str,
        value: crate::params::ParameterValue,
    ) -> crate::errors::CameraResult<crate::params::ParameterValue> {
        self.view.validate(key, value)
    }

    /// The key actually written on the wire for a normalized key
    pub fn wire_key<'a>(&'a self, key: &'a str) -> &'a str {
        self.wire_keys.get(key).map(String::as_str).unwrap_or(key)
    }

    /// The untouched probe result
    pub fn base(&self) -> &CapabilitySet {
        &self.base
    }

    /// The overlaid set the session exposes
    pub fn view(&self) -> &CapabilitySet {
        &self.view
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.view.iter()
    }
}

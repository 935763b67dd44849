// SPDX-License-Identifier: GPL-3.0-only

//! Persisted parameter settings
//!
//! The core persists only the last-applied parameter values per device id,
//! never capability data: capabilities are re-probed on every open because
//! firmware updates can change them. The store is a narrow external contract
//! so hosts can bring their own persistence.

use crate::params::ParameterValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Last-applied values for one device
pub type DeviceSettings = HashMap<String, ParameterValue>;

/// Narrow persistence contract
pub trait SettingsStore: Send + Sync {
    fn load(&self, device_id: &str) -> Option<DeviceSettings>;

    fn save(&self, device_id: &str, values: &DeviceSettings);
}

/// In-memory store, used by tests and one-shot CLI runs
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    entries: Mutex<HashMap<String, DeviceSettings>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self, device_id: &str) -> Option<DeviceSettings> {
        self.entries.lock().unwrap().get(device_id).cloned()
    }

    fn save(&self, device_id: &str, values: &DeviceSettings) {
        self.entries
            .lock()
            .unwrap()
            .insert(device_id.to_string(), values.clone());
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    devices: HashMap<String, DeviceSettings>,
}

/// JSON file store keyed by device id
pub struct JsonSettingsStore {
    path: PathBuf,
    cache: Mutex<SettingsFile>,
}

impl JsonSettingsStore {
    /// Store at the default per-user config location
    pub fn default_location() -> Self {
        let path = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("camhal")
            .join("parameters.json");
        Self::at(path)
    }

    pub fn at(path: PathBuf) -> Self {
        let cache = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        Self {
            path,
            cache: Mutex::new(cache),
        }
    }

    fn flush(&self, file: &SettingsFile) {
        if let Some(parent) = self.path.parent()
            && let Err(err) = std::fs::create_dir_all(parent)
        {
            warn!(error = %err, "Failed to create settings directory");
            return;
        }
        match serde_json::to_string_pretty(file) {
            Ok(text) => {
                if let Err(err) = std::fs::write(&self.path, text) {
                    warn!(path = %self.path.display(), error = %err, "Failed to write settings");
                }
            }
            Err(err) => warn!(error = %err, "Failed to serialize settings"),
        }
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self, device_id: &str) -> Option<DeviceSettings> {
        self.cache.lock().unwrap().devices.get(device_id).cloned()
    }

    fn save(&self, device_id: &str, values: &DeviceSettings) {
        let mut cache = self.cache.lock().unwrap();
        cache.devices.insert(device_id.to_string(), values.clone());
        debug!(device = device_id, keys = values.len(), "Persisting parameter values");
        self.flush(&cache);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemorySettingsStore::new();
        assert!(store.load("cam0").is_none());

        let mut values = DeviceSettings::new();
        values.insert("iso".into(), ParameterValue::Int(800));
        store.save("cam0", &values);

        let loaded = store.load("cam0").unwrap();
        assert_eq!(loaded.get("iso"), Some(&ParameterValue::Int(800)));
    }

    #[test]
    fn test_json_store_roundtrip() {
        let dir = std::env::temp_dir().join(format!("camhal-test-{}", std::process::id()));
        let path = dir.join("parameters.json");

        let store = JsonSettingsStore::at(path.clone());
        let mut values = DeviceSettings::new();
        values.insert("white-balance".into(), ParameterValue::Text("cloudy".into()));
        store.save("cam1", &values);

        // A fresh store instance reads back from disk
        let reloaded = JsonSettingsStore::at(path);
        let loaded = reloaded.load("cam1").unwrap();
        assert_eq!(
            loaded.get("white-balance"),
            Some(&ParameterValue::Text("cloudy".into()))
        );

        let _ = std::fs::remove_dir_all(dir);
    }
}

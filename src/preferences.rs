//! Device preference provider: labels and temperature thresholds per device
//! and per viewer.
//!
//! The alert engine only reads through [`DevicePreferenceProvider`] and does
//! so on every evaluation, so changes made through [`PreferenceRegistry`]
//! take effect on the next reading without any cache invalidation.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::models::ThresholdConfig;
use crate::storage::{SharedStorage, WriteBehind};

// ---

const KEY_PREFIX: &str = "prefs:";

/// Everything known about one device's display and alerting preferences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePreferences {
    // ---
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<ThresholdConfig>,
    #[serde(default)]
    pub viewer_labels: HashMap<String, String>,
    #[serde(default)]
    pub viewer_thresholds: HashMap<String, ThresholdConfig>,
}

impl DevicePreferences {
    // ---
    /// True when neither a device-level nor any per-viewer bound is set.
    pub fn has_thresholds(&self) -> bool {
        self.threshold.is_some_and(|t| !t.is_empty())
            || self.viewer_thresholds.values().any(|t| !t.is_empty())
    }

    /// Label shown to `viewer`: their own override, else the device label.
    pub fn label_for(&self, viewer: Option<&str>) -> Option<String> {
        viewer
            .and_then(|v| self.viewer_labels.get(v))
            .or(self.label.as_ref())
            .cloned()
    }

    fn is_empty(&self) -> bool {
        self.label.is_none()
            && self.threshold.is_none()
            && self.viewer_labels.is_empty()
            && self.viewer_thresholds.is_empty()
    }
}

/// Read-only view of device preferences consumed by the alert engine.
pub trait DevicePreferenceProvider: Send + Sync {
    fn preferences(&self, device_id: &str) -> DevicePreferences;
}

/// In-memory preference registry with ordered, best-effort write-through.
#[derive(Default)]
pub struct PreferenceRegistry {
    devices: RwLock<HashMap<String, DevicePreferences>>,
    storage: Option<WriteBehind>,
}

impl PreferenceRegistry {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that persists every change through `storage`.
    pub fn with_storage(storage: SharedStorage) -> Self {
        Self {
            devices: RwLock::default(),
            storage: Some(WriteBehind::new(storage)),
        }
    }

    /// Load persisted preferences. Undecodable records are skipped.
    pub async fn hydrate(&self) -> usize {
        // ---
        let Some(storage) = self.storage.as_ref().map(WriteBehind::storage) else {
            return 0;
        };
        let keys = match storage.keys(KEY_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "Could not list persisted preferences");
                return 0;
            }
        };

        let mut loaded = HashMap::new();
        for key in keys {
            let Some(device_id) = key.strip_prefix(KEY_PREFIX).map(str::to_string) else {
                continue;
            };
            match storage.read(&key).await {
                Ok(Some(value)) => match serde_json::from_value::<DevicePreferences>(value) {
                    Ok(prefs) => {
                        loaded.insert(device_id, prefs);
                    }
                    Err(e) => tracing::warn!(%key, error = %e, "Skipping undecodable preferences"),
                },
                Ok(None) => {}
                Err(e) => tracing::warn!(%key, error = %e, "Could not read preferences"),
            }
        }

        let count = loaded.len();
        self.devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(loaded);
        count
    }

    pub fn set_label(&self, device_id: &str, label: Option<String>) {
        self.update(device_id, |p| p.label = label);
    }

    pub fn set_viewer_label(&self, device_id: &str, viewer: &str, label: Option<String>) {
        self.update(device_id, |p| match label {
            Some(label) => {
                p.viewer_labels.insert(viewer.to_string(), label);
            }
            None => {
                p.viewer_labels.remove(viewer);
            }
        });
    }

    /// Set the legacy device-level threshold used when no viewer has one.
    pub fn set_device_threshold(&self, device_id: &str, threshold: ThresholdConfig) {
        self.update(device_id, |p| {
            p.threshold = (!threshold.is_empty()).then_some(threshold);
        });
    }

    pub fn set_viewer_threshold(&self, device_id: &str, viewer: &str, threshold: ThresholdConfig) {
        self.update(device_id, |p| {
            if threshold.is_empty() {
                p.viewer_thresholds.remove(viewer);
            } else {
                p.viewer_thresholds.insert(viewer.to_string(), threshold);
            }
        });
    }

    pub fn remove_viewer_threshold(&self, device_id: &str, viewer: &str) {
        self.update(device_id, |p| {
            p.viewer_thresholds.remove(viewer);
        });
    }

    /// Drop every threshold for the device, device-level and per-viewer.
    pub fn clear_thresholds(&self, device_id: &str) {
        self.update(device_id, |p| {
            p.threshold = None;
            p.viewer_thresholds.clear();
        });
    }

    fn update<F>(&self, device_id: &str, mutate: F)
    where
        F: FnOnce(&mut DevicePreferences),
    {
        // ---
        let snapshot = {
            let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
            let prefs = devices.entry(device_id.to_string()).or_default();
            mutate(prefs);
            if prefs.is_empty() {
                devices.remove(device_id);
                None
            } else {
                Some(prefs.clone())
            }
        };

        let Some(storage) = &self.storage else {
            return;
        };
        let key = format!("{KEY_PREFIX}{device_id}");
        match snapshot {
            Some(prefs) => storage.write(key, prefs),
            None => storage.delete(key),
        }
    }
}

impl DevicePreferenceProvider for PreferenceRegistry {
    fn preferences(&self, device_id: &str) -> DevicePreferences {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .cloned()
            .unwrap_or_default()
    }
}

//! Hysteresis alert engine.
//!
//! State is kept per (device, viewer) and only transitions are reported: a
//! device that stays above its bound for a hundred readings produces one
//! notification, on the reading that crossed. Clearing happens silently as
//! far as notification channels are concerned, but is returned to the caller
//! and logged.
//!
//! States are stored as a map of device to a map of viewer to the current
//! [`ActiveAlert`]. An entry exists only while that pair is breaching, so
//! "mode is ok" and "no entry" are the same thing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::models::{ActiveAlert, AlertVariant, Reading, ThresholdConfig};
use crate::notify::AlertSink;
use crate::preferences::{DevicePreferenceProvider, DevicePreferences};

// ---

/// Viewer key used for the device-level threshold when no viewer has one.
pub const DEVICE_WIDE_VIEWER: &str = "__device__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertMode {
    Ok,
    Low,
    High,
}

impl AlertMode {
    // ---
    /// High takes precedence when a misconfigured band lets both match.
    pub fn evaluate(temperature_c: f64, thresholds: &ThresholdConfig) -> Self {
        // ---
        if thresholds.high_c.is_some_and(|high| temperature_c > high) {
            AlertMode::High
        } else if thresholds.low_c.is_some_and(|low| temperature_c < low) {
            AlertMode::Low
        } else {
            AlertMode::Ok
        }
    }

    fn variant(self) -> Option<AlertVariant> {
        match self {
            AlertMode::Ok => None,
            AlertMode::Low => Some(AlertVariant::Low),
            AlertMode::High => Some(AlertVariant::High),
        }
    }

    fn of(alert: Option<&ActiveAlert>) -> Self {
        match alert.map(|a| a.variant) {
            None => AlertMode::Ok,
            Some(AlertVariant::Low) => AlertMode::Low,
            Some(AlertVariant::High) => AlertMode::High,
        }
    }
}

/// A change of alert state for one (device, viewer) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Entered a breach, or switched sides; handed to the alert sink.
    Raised(ActiveAlert),
    /// Returned to normal, or the thresholds behind the alert went away.
    Cleared(ActiveAlert),
}

type DeviceStates = HashMap<String, ActiveAlert>;

pub struct AlertEngine {
    preferences: Arc<dyn DevicePreferenceProvider>,
    sink: Arc<dyn AlertSink>,
    states: Mutex<HashMap<String, DeviceStates>>,
}

impl AlertEngine {
    // ---
    pub fn new(preferences: Arc<dyn DevicePreferenceProvider>, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            preferences,
            sink,
            states: Mutex::default(),
        }
    }

    /// Evaluate `reading` against every threshold that applies to its device.
    ///
    /// Demo readings are ignored. Preferences are re-read on every call.
    /// Raised alerts are passed to the sink after the state lock is released.
    pub fn evaluate(&self, reading: &Reading) -> Vec<Transition> {
        // ---
        if reading.is_demo {
            return Vec::new();
        }

        let prefs = self.preferences.preferences(&reading.device_id);
        let targets = resolve_targets(&prefs);
        let mut transitions = Vec::new();

        {
            let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
            let device = states.entry(reading.device_id.clone()).or_default();

            // Viewers that lost their threshold since the last reading.
            let stale: Vec<String> = device
                .keys()
                .filter(|key| !targets.iter().any(|(k, _)| k == *key))
                .cloned()
                .collect();
            for key in stale {
                if let Some(alert) = device.remove(&key) {
                    transitions.push(Transition::Cleared(alert));
                }
            }

            for (key, thresholds) in &targets {
                let prev = AlertMode::of(device.get(key));
                let next = AlertMode::evaluate(reading.temperature_c, thresholds);

                let Some(variant) = next.variant() else {
                    if let Some(alert) = device.remove(key) {
                        transitions.push(Transition::Cleared(alert));
                    }
                    continue;
                };

                let bound = match variant {
                    AlertVariant::High => thresholds.high_c,
                    AlertVariant::Low => thresholds.low_c,
                };
                let Some(threshold_c) = bound else {
                    continue;
                };

                let viewer = (key != DEVICE_WIDE_VIEWER).then(|| key.clone());
                let triggered_at = device
                    .get(key)
                    .map(|a| a.triggered_at)
                    .unwrap_or(reading.timestamp);
                let alert = ActiveAlert {
                    device_id: reading.device_id.clone(),
                    variant,
                    temperature_c: reading.temperature_c,
                    threshold_c,
                    triggered_at,
                    room_label: prefs.label_for(viewer.as_deref()),
                    viewer_identity: viewer,
                };
                device.insert(key.clone(), alert.clone());

                if next != prev {
                    transitions.push(Transition::Raised(alert));
                }
            }

            if device.is_empty() {
                states.remove(&reading.device_id);
            }
        }

        self.report(&transitions);
        transitions
    }

    /// Re-read preferences for `device_id` after they were edited.
    ///
    /// Clears every alert for the device when it has no thresholds left;
    /// otherwise clears only the viewers whose threshold was removed.
    pub fn thresholds_changed(&self, device_id: &str) -> Vec<Transition> {
        // ---
        let prefs = self.preferences.preferences(device_id);
        if !prefs.has_thresholds() {
            return self.clear_device(device_id);
        }

        let targets = resolve_targets(&prefs);
        let mut transitions = Vec::new();
        {
            let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(device) = states.get_mut(device_id) {
                device.retain(|key, alert| {
                    let keep = targets.iter().any(|(k, t)| k == key && !t.is_empty());
                    if !keep {
                        transitions.push(Transition::Cleared(alert.clone()));
                    }
                    keep
                });
                if device.is_empty() {
                    states.remove(device_id);
                }
            }
        }

        self.report(&transitions);
        transitions
    }

    /// Drop every alert for `device_id`, whatever viewer it belongs to.
    pub fn clear_device(&self, device_id: &str) -> Vec<Transition> {
        // ---
        let removed = self
            .states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(device_id)
            .unwrap_or_default();

        let transitions: Vec<Transition> = removed.into_values().map(Transition::Cleared).collect();
        self.report(&transitions);
        transitions
    }

    /// Snapshot of all current breaches, ordered by device then viewer.
    pub fn list_active(&self) -> Vec<ActiveAlert> {
        // ---
        let mut alerts: Vec<ActiveAlert> = self
            .states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .flat_map(|device| device.values().cloned())
            .collect();

        alerts.sort_by(|a, b| {
            a.device_id
                .cmp(&b.device_id)
                .then_with(|| a.viewer_identity.cmp(&b.viewer_identity))
        });
        alerts
    }

    fn report(&self, transitions: &[Transition]) {
        // ---
        for transition in transitions {
            match transition {
                Transition::Raised(alert) => {
                    tracing::info!(
                        device_id = %alert.device_id,
                        viewer = alert.viewer_identity.as_deref().unwrap_or(DEVICE_WIDE_VIEWER),
                        variant = %alert.variant,
                        temperature_c = alert.temperature_c,
                        threshold_c = alert.threshold_c,
                        "Temperature alert raised"
                    );
                    self.sink.send(alert.clone());
                }
                Transition::Cleared(alert) => {
                    tracing::info!(
                        device_id = %alert.device_id,
                        viewer = alert.viewer_identity.as_deref().unwrap_or(DEVICE_WIDE_VIEWER),
                        "Temperature alert cleared"
                    );
                }
            }
        }
    }
}

/// Viewer thresholds when any exist, else the device-level fallback.
fn resolve_targets(prefs: &DevicePreferences) -> Vec<(String, ThresholdConfig)> {
    // ---
    if prefs.viewer_thresholds.is_empty() {
        vec![(
            DEVICE_WIDE_VIEWER.to_string(),
            prefs.threshold.unwrap_or_default(),
        )]
    } else {
        prefs
            .viewer_thresholds
            .iter()
            .map(|(viewer, t)| (viewer.clone(), *t))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::preferences::PreferenceRegistry;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    #[derive(Default)]
    struct CountingSink {
        sent: Mutex<Vec<ActiveAlert>>,
    }

    impl AlertSink for CountingSink {
        fn send(&self, alert: ActiveAlert) {
            self.sent.lock().unwrap().push(alert);
        }
    }

    struct Fixture {
        registry: Arc<PreferenceRegistry>,
        sink: Arc<CountingSink>,
        engine: AlertEngine,
    }

    fn fixture() -> Fixture {
        // ---
        let registry = Arc::new(PreferenceRegistry::new());
        let sink = Arc::new(CountingSink::default());
        let engine = AlertEngine::new(registry.clone(), sink.clone());
        Fixture {
            registry,
            sink,
            engine,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn reading(device_id: &str, temperature_c: f64, offset_secs: i64) -> Reading {
        Reading {
            device_id: device_id.to_string(),
            timestamp: t0() + Duration::seconds(offset_secs),
            temperature_c,
            humidity_pct: None,
            rssi: None,
            is_demo: false,
        }
    }

    fn count_raised(transitions: &[Transition]) -> usize {
        transitions
            .iter()
            .filter(|t| matches!(t, Transition::Raised(_)))
            .count()
    }

    fn count_cleared(transitions: &[Transition]) -> usize {
        transitions
            .iter()
            .filter(|t| matches!(t, Transition::Cleared(_)))
            .count()
    }

    #[test]
    fn test_mode_evaluation() {
        // ---
        let band = ThresholdConfig {
            low_c: Some(5.0),
            high_c: Some(30.0),
        };
        assert_eq!(AlertMode::evaluate(30.0, &band), AlertMode::Ok);
        assert_eq!(AlertMode::evaluate(30.1, &band), AlertMode::High);
        assert_eq!(AlertMode::evaluate(5.0, &band), AlertMode::Ok);
        assert_eq!(AlertMode::evaluate(4.9, &band), AlertMode::Low);
        assert_eq!(AlertMode::evaluate(99.0, &ThresholdConfig::default()), AlertMode::Ok);
    }

    #[test]
    fn test_hysteresis_fires_once_per_crossing() {
        // ---
        let f = fixture();
        f.registry
            .set_viewer_threshold("Room-1", "a@x.com", ThresholdConfig::high(30.0));

        let mut raised = 0;
        let mut cleared = 0;
        for (i, temp) in [29.0, 31.0, 32.0, 29.0].into_iter().enumerate() {
            let transitions = f.engine.evaluate(&reading("Room-1", temp, i as i64));
            raised += count_raised(&transitions);
            cleared += count_cleared(&transitions);
        }

        assert_eq!(raised, 1);
        assert_eq!(cleared, 1);
        let sent = f.sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].temperature_c, 31.0);
        assert!(f.engine.list_active().is_empty());
    }

    #[test]
    fn test_triggered_at_is_stable_within_breach() {
        // ---
        let f = fixture();
        f.registry
            .set_viewer_threshold("Room-1", "a@x.com", ThresholdConfig::high(30.0));

        f.engine.evaluate(&reading("Room-1", 31.0, 10));
        let first = f.engine.list_active()[0].clone();
        f.engine.evaluate(&reading("Room-1", 32.0, 20));
        let second = f.engine.list_active()[0].clone();

        assert_eq!(first.triggered_at, t0() + Duration::seconds(10));
        assert_eq!(second.triggered_at, first.triggered_at);
        assert_eq!(second.temperature_c, 32.0);

        // A fresh breach after recovery gets a fresh timestamp.
        f.engine.evaluate(&reading("Room-1", 25.0, 30));
        f.engine.evaluate(&reading("Room-1", 33.0, 40));
        assert_eq!(
            f.engine.list_active()[0].triggered_at,
            t0() + Duration::seconds(40)
        );
    }

    #[test]
    fn test_switching_sides_notifies_again() {
        // ---
        let f = fixture();
        f.registry.set_viewer_threshold(
            "Room-1",
            "a@x.com",
            ThresholdConfig {
                low_c: Some(5.0),
                high_c: Some(30.0),
            },
        );

        f.engine.evaluate(&reading("Room-1", 2.0, 0));
        let transitions = f.engine.evaluate(&reading("Room-1", 35.0, 1));

        assert_eq!(count_raised(&transitions), 1);
        let active = f.engine.list_active();
        assert_eq!(active[0].variant, AlertVariant::High);
        assert_eq!(active[0].threshold_c, 30.0);
        assert_eq!(f.sink.sent.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_threshold_removal_clears_without_reading() {
        // ---
        let f = fixture();
        f.registry
            .set_viewer_threshold("Room-1", "a@x.com", ThresholdConfig::high(30.0));
        f.registry
            .set_viewer_threshold("Room-1", "b@x.com", ThresholdConfig::high(31.0));
        f.engine.evaluate(&reading("Room-1", 35.0, 0));
        assert_eq!(f.engine.list_active().len(), 2);

        f.registry.clear_thresholds("Room-1");
        let transitions = f.engine.thresholds_changed("Room-1");

        assert_eq!(count_cleared(&transitions), 2);
        assert!(f.engine.list_active().is_empty());
    }

    #[test]
    fn test_removing_one_viewer_keeps_others() {
        // ---
        let f = fixture();
        f.registry
            .set_viewer_threshold("Room-1", "a@x.com", ThresholdConfig::high(30.0));
        f.registry
            .set_viewer_threshold("Room-1", "b@x.com", ThresholdConfig::high(31.0));
        f.engine.evaluate(&reading("Room-1", 35.0, 0));

        f.registry.remove_viewer_threshold("Room-1", "a@x.com");
        f.engine.thresholds_changed("Room-1");

        let active = f.engine.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].viewer_identity.as_deref(), Some("b@x.com"));
    }

    #[test]
    fn test_demo_readings_never_alert() {
        // ---
        let f = fixture();
        f.registry
            .set_device_threshold("Demo-1", ThresholdConfig::high(10.0));

        let mut demo = reading("Demo-1", 90.0, 0);
        demo.is_demo = true;

        assert!(f.engine.evaluate(&demo).is_empty());
        assert!(f.engine.list_active().is_empty());
        assert!(f.sink.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_device_level_fallback_uses_sentinel_viewer() {
        // ---
        let f = fixture();
        f.registry.set_label("Room-2", Some("Freezer".into()));
        f.registry
            .set_device_threshold("Room-2", ThresholdConfig::low(-10.0));

        f.engine.evaluate(&reading("Room-2", -12.0, 0));

        let active = f.engine.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].variant, AlertVariant::Low);
        assert_eq!(active[0].viewer_identity, None);
        assert_eq!(active[0].room_label.as_deref(), Some("Freezer"));

        // Once a viewer configures thresholds the fallback no longer applies.
        f.registry
            .set_viewer_threshold("Room-2", "a@x.com", ThresholdConfig::high(0.0));
        let transitions = f.engine.evaluate(&reading("Room-2", -12.0, 1));
        assert_eq!(count_cleared(&transitions), 1);
        assert!(f.engine.list_active().is_empty());
    }

    #[test]
    fn test_no_thresholds_is_a_no_op() {
        let f = fixture();
        assert!(f.engine.evaluate(&reading("Room-3", 80.0, 0)).is_empty());
        assert!(f.engine.list_active().is_empty());
    }
}

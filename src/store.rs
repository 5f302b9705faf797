//! Ingestion store: bounded, TTL-pruned per-device history and the entry
//! point of the pipeline.
//!
//! `add` runs synchronously through pruning, live fanout and alert
//! evaluation. The only work it leaves behind is detached: persisting the
//! device's history (encoded and written by the storage writer task) and
//! delivering notifications. A device entry is never
//! removed once created; pruning only trims its contents, and freshness
//! queries keep the newest reading of an offline device so it stays visible
//! as "offline, last known" instead of disappearing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::alerts::AlertEngine;
use crate::bus::EventBus;
use crate::models::Reading;
use crate::storage::{SharedStorage, WriteBehind};

// ---

const KEY_PREFIX: &str = "history:";

/// Retention policy for device histories.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Maximum readings kept per device; the oldest is evicted first.
    pub capacity: usize,
    /// Age beyond which a reading is stale.
    pub ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 500,
            ttl: Duration::seconds(60),
        }
    }
}

#[derive(Default)]
struct Inner {
    histories: HashMap<String, VecDeque<Reading>>,
    /// Every non-demo device ever seen.
    real_devices: HashSet<String>,
}

pub struct Store {
    config: StoreConfig,
    inner: Mutex<Inner>,
    bus: EventBus,
    alerts: Arc<AlertEngine>,
    storage: Option<WriteBehind>,
}

impl Store {
    // ---
    pub fn new(config: StoreConfig, bus: EventBus, alerts: Arc<AlertEngine>) -> Self {
        Self {
            config: StoreConfig {
                capacity: config.capacity.max(1),
                ttl: config.ttl,
            },
            inner: Mutex::default(),
            bus,
            alerts,
            storage: None,
        }
    }

    /// Persist each device's history through `storage` after every add.
    pub fn with_storage(mut self, storage: SharedStorage) -> Self {
        self.storage = Some(WriteBehind::new(storage));
        self
    }

    pub fn config(&self) -> StoreConfig {
        self.config
    }

    /// Ingest one validated reading.
    pub fn add(&self, reading: Reading) {
        // ---
        let now = Utc::now();
        let snapshot = {
            let mut inner = self.lock();
            if !reading.is_demo {
                inner.real_devices.insert(reading.device_id.clone());
            }
            let history = inner.histories.entry(reading.device_id.clone()).or_default();

            prune(history, now - self.config.ttl, false);
            history.push_back(reading.clone());
            while history.len() > self.config.capacity {
                history.pop_front();
            }

            self.storage.as_ref().map(|_| history.iter().cloned().collect::<Vec<_>>())
        };

        tracing::debug!(
            device_id = %reading.device_id,
            temperature_c = reading.temperature_c,
            demo = reading.is_demo,
            "Reading ingested"
        );

        if let (Some(storage), Some(history)) = (&self.storage, snapshot) {
            storage.write(format!("{KEY_PREFIX}{}", reading.device_id), history);
        }

        self.bus.publish(&reading);
        self.alerts.evaluate(&reading);
    }

    /// Most recently stored reading for `device_id`.
    pub fn latest(&self, device_id: &str) -> Option<Reading> {
        self.lock()
            .histories
            .get(device_id)
            .and_then(|h| h.back().cloned())
    }

    /// Stored history for `device_id`, oldest first.
    pub fn history(&self, device_id: &str) -> Vec<Reading> {
        self.lock()
            .histories
            .get(device_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Latest reading of every known device, ordered by device id.
    ///
    /// Prunes each history to readings newer than `now - ttl`; a device
    /// whose readings are all stale keeps its newest one.
    pub fn list_latest(&self, ttl: Duration) -> Vec<Reading> {
        // ---
        let cutoff = Utc::now() - ttl;
        let mut inner = self.lock();

        let mut latest: Vec<Reading> = inner
            .histories
            .values_mut()
            .filter_map(|history| {
                prune(history, cutoff, true);
                history.back().cloned()
            })
            .collect();

        latest.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        latest
    }

    /// Non-demo devices with at least one reading newer than `now - ttl`.
    pub fn active_device_count(&self, ttl: Duration) -> usize {
        // ---
        let cutoff = Utc::now() - ttl;
        self.lock()
            .histories
            .values()
            .filter(|history| history.iter().any(|r| !r.is_demo && is_fresh(r, cutoff)))
            .count()
    }

    /// Non-demo devices ever seen by this process (or restored from storage).
    pub fn total_device_count(&self) -> usize {
        self.lock().real_devices.len()
    }

    /// Restore persisted histories.
    ///
    /// Records that do not decode, including ones with an unparseable
    /// timestamp, are skipped individually. Returns the number of devices
    /// restored.
    pub async fn hydrate(&self) -> usize {
        // ---
        let Some(storage) = self.storage.as_ref().map(WriteBehind::storage) else {
            return 0;
        };
        let keys = match storage.keys(KEY_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "Could not list persisted histories, starting empty");
                return 0;
            }
        };

        let mut restored = HashMap::new();
        for key in keys {
            let Some(device_id) = key.strip_prefix(KEY_PREFIX).map(str::to_string) else {
                continue;
            };
            let records = match storage.read(&key).await {
                Ok(Some(Value::Array(records))) => records,
                Ok(Some(_)) => {
                    tracing::warn!(%key, "Persisted history is not an array, skipping");
                    continue;
                }
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(%key, error = %e, "Could not read persisted history");
                    continue;
                }
            };

            let (history, skipped) = decode_history(records, self.config.capacity);
            if skipped > 0 {
                tracing::warn!(%key, skipped, "Dropped undecodable readings from persisted history");
            }
            if !history.is_empty() {
                restored.insert(device_id, history);
            }
        }

        let count = restored.len();
        let mut inner = self.lock();
        for (device_id, history) in restored {
            if history.iter().any(|r| !r.is_demo) {
                inner.real_devices.insert(device_id.clone());
            }
            inner.histories.insert(device_id, history);
        }
        tracing::info!(devices = count, "Restored device histories");
        count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_fresh(reading: &Reading, cutoff: DateTime<Utc>) -> bool {
    reading.timestamp > cutoff
}

/// Drop readings at or before `cutoff`. With `keep_last`, a history that
/// would become empty keeps its most recently stored reading instead.
fn prune(history: &mut VecDeque<Reading>, cutoff: DateTime<Utc>, keep_last: bool) {
    // ---
    let sentinel = if keep_last { history.back().cloned() } else { None };
    history.retain(|r| is_fresh(r, cutoff));
    if history.is_empty() {
        if let Some(last) = sentinel {
            history.push_back(last);
        }
    }
}

fn decode_history(records: Vec<Value>, capacity: usize) -> (VecDeque<Reading>, usize) {
    // ---
    let total = records.len();
    let mut history: VecDeque<Reading> = records
        .into_iter()
        .filter_map(|record| serde_json::from_value::<Reading>(record).ok())
        .collect();
    let skipped = total - history.len();

    while history.len() > capacity {
        history.pop_front();
    }
    (history, skipped)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{ActiveAlert, ThresholdConfig};
    use crate::notify::AlertSink;
    use crate::preferences::PreferenceRegistry;
    use crate::storage::{MemoryStorage, SlowWrites, Storage};
    use serde_json::json;

    struct NullSink;

    impl AlertSink for NullSink {
        fn send(&self, _alert: ActiveAlert) {}
    }

    fn store(capacity: usize) -> (Store, Arc<PreferenceRegistry>, Arc<AlertEngine>) {
        // ---
        let registry = Arc::new(PreferenceRegistry::new());
        let engine = Arc::new(AlertEngine::new(registry.clone(), Arc::new(NullSink)));
        let config = StoreConfig {
            capacity,
            ttl: Duration::seconds(60),
        };
        (Store::new(config, EventBus::new(), engine.clone()), registry, engine)
    }

    fn reading_at(device_id: &str, temperature_c: f64, at: DateTime<Utc>) -> Reading {
        Reading {
            device_id: device_id.to_string(),
            timestamp: at,
            temperature_c,
            humidity_pct: Some(40.0),
            rssi: Some(-60),
            is_demo: false,
        }
    }

    #[test]
    fn test_history_is_bounded_and_evicts_oldest() {
        // ---
        let (store, _, _) = store(3);
        let now = Utc::now();
        for i in 0..4 {
            store.add(reading_at("Room-1", i as f64, now + Duration::milliseconds(i)));
        }

        let history = store.history("Room-1");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].temperature_c, 1.0);
        assert_eq!(store.latest("Room-1").unwrap().temperature_c, 3.0);
    }

    #[test]
    fn test_latest_unknown_device() {
        let (store, _, _) = store(10);
        assert!(store.latest("nope").is_none());
        assert!(store.history("nope").is_empty());
    }

    #[test]
    fn test_offline_device_keeps_last_reading() {
        // ---
        let (store, _, _) = store(10);
        let long_ago = Utc::now() - Duration::minutes(10);
        store.add(reading_at("Room-1", 20.0, long_ago));
        store.add(reading_at("Room-1", 21.0, long_ago + Duration::seconds(1)));
        store.add(reading_at("Room-2", 22.0, Utc::now()));

        let latest = store.list_latest(Duration::seconds(60));

        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].device_id, "Room-1");
        assert_eq!(latest[0].temperature_c, 21.0);
        assert_eq!(store.history("Room-1").len(), 1);
    }

    #[test]
    fn test_pruning_is_idempotent() {
        // ---
        let (store, _, _) = store(10);
        let now = Utc::now();
        store.add(reading_at("Room-1", 20.0, now - Duration::minutes(5)));
        store.add(reading_at("Room-1", 21.0, now));
        store.add(reading_at("Room-2", 22.0, now - Duration::minutes(5)));

        let first = store.list_latest(Duration::seconds(60));
        let histories_first = (store.history("Room-1"), store.history("Room-2"));
        let second = store.list_latest(Duration::seconds(60));
        let histories_second = (store.history("Room-1"), store.history("Room-2"));

        assert_eq!(first, second);
        assert_eq!(histories_first, histories_second);
    }

    #[test]
    fn test_prune_excludes_stale_and_keeps_sentinel() {
        // ---
        let now = Utc::now();
        let mut history: VecDeque<Reading> = [
            reading_at("Room-1", 1.0, now - Duration::seconds(120)),
            reading_at("Room-1", 2.0, now - Duration::seconds(90)),
        ]
        .into_iter()
        .collect();

        prune(&mut history, now - Duration::seconds(60), false);
        assert!(history.is_empty());

        history.push_back(reading_at("Room-1", 3.0, now - Duration::seconds(90)));
        history.push_back(reading_at("Room-1", 4.0, now - Duration::seconds(80)));
        prune(&mut history, now - Duration::seconds(60), true);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].temperature_c, 4.0);
    }

    #[test]
    fn test_device_counts_ignore_demo_and_stale() {
        // ---
        let (store, _, _) = store(10);
        let now = Utc::now();
        store.add(reading_at("Room-1", 20.0, now));
        store.add(reading_at("Room-2", 20.0, now - Duration::minutes(5)));
        let mut demo = reading_at("Demo-1", 20.0, now);
        demo.is_demo = true;
        store.add(demo);

        assert_eq!(store.active_device_count(Duration::seconds(60)), 1);
        assert_eq!(store.total_device_count(), 2);
        assert_eq!(store.list_latest(Duration::seconds(60)).len(), 3);
    }

    #[test]
    fn test_add_publishes_and_evaluates() {
        // ---
        let (store, registry, engine) = store(10);
        registry.set_viewer_threshold("Room-1", "a@x.com", ThresholdConfig::high(30.0));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = store.bus.subscribe(move |r| sink.lock().unwrap().push(r.temperature_c));

        store.add(reading_at("Room-1", 35.0, Utc::now()));
        assert_eq!(*seen.lock().unwrap(), vec![35.0]);
        assert_eq!(engine.list_active().len(), 1);

        store.add(reading_at("Room-1", 25.0, Utc::now()));
        assert!(engine.list_active().is_empty());
    }

    #[tokio::test]
    async fn test_hydrate_skips_unparseable_timestamps() {
        // ---
        let storage: SharedStorage = Arc::new(MemoryStorage::new());
        let now = Utc::now();
        storage
            .write(
                "history:Room-1",
                json!([
                    { "deviceId": "Room-1", "timestamp": "not a time", "temperatureC": 19.0 },
                    serde_json::to_value(reading_at("Room-1", 20.0, now)).unwrap(),
                ]),
            )
            .await
            .unwrap();
        storage.write("history:Room-2", json!({ "oops": true })).await.unwrap();

        let (store, _, _) = store(10);
        let store = store.with_storage(storage);

        assert_eq!(store.hydrate().await, 1);
        assert_eq!(store.history("Room-1").len(), 1);
        assert_eq!(store.latest("Room-1").unwrap().temperature_c, 20.0);
        assert_eq!(store.total_device_count(), 1);
    }

    #[tokio::test]
    async fn test_add_writes_history_through() {
        // ---
        let storage: SharedStorage = Arc::new(MemoryStorage::new());
        let (store, _, _) = store(10);
        let store = store.with_storage(Arc::clone(&storage));

        store.add(reading_at("Room-1", 20.0, Utc::now()));

        let mut persisted = None;
        for _ in 0..50 {
            persisted = storage.read("history:Room-1").await.unwrap();
            if persisted.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let records = persisted.unwrap();
        assert_eq!(records.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_slow_backend_keeps_newest_history() {
        // ---
        let storage: SharedStorage = Arc::new(SlowWrites::new(std::time::Duration::from_millis(30)));
        let (store, _, _) = store(10);
        let store = store.with_storage(Arc::clone(&storage));

        let now = Utc::now();
        for i in 0..5 {
            store.add(reading_at("Room-1", i as f64, now + Duration::milliseconds(i)));
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        let (restored, _, _) = self::store(10);
        let restored = restored.with_storage(storage);
        assert_eq!(restored.hydrate().await, 1);
        assert_eq!(restored.history("Room-1").len(), 5);
        assert_eq!(restored.latest("Room-1").unwrap().temperature_c, 4.0);
    }

    #[tokio::test]
    async fn test_hydrate_keeps_device_ids_that_look_like_keys() {
        // ---
        let storage: SharedStorage = Arc::new(MemoryStorage::new());
        let record = serde_json::to_value(vec![reading_at("history:x", 20.0, Utc::now())]).unwrap();
        storage.write("history:history:x", record).await.unwrap();

        let (store, _, _) = store(10);
        let store = store.with_storage(storage);

        assert_eq!(store.hydrate().await, 1);
        assert_eq!(store.latest("history:x").map(|r| r.temperature_c), Some(20.0));
        assert!(store.latest("x").is_none());
    }
}

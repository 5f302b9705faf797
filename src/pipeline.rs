//! Assembly of the ingestion → distribution → alerting pipeline.
//!
//! Dependency order, leaves first: event bus, alert sink, alert engine,
//! ingestion store. [`Pipeline`] owns one of each and is cheap to clone.

use std::sync::Arc;

use crate::alerts::AlertEngine;
use crate::bus::EventBus;
use crate::notify::AlertSink;
use crate::preferences::PreferenceRegistry;
use crate::storage::SharedStorage;
use crate::store::{Store, StoreConfig};

// ---

#[derive(Clone)]
pub struct Pipeline {
    pub store: Arc<Store>,
    pub alerts: Arc<AlertEngine>,
    pub preferences: Arc<PreferenceRegistry>,
    pub bus: EventBus,
}

impl Pipeline {
    // ---
    /// Wire the components together. With `storage`, histories and
    /// preferences are written through to it; call [`Pipeline::hydrate`]
    /// to load what it already holds.
    pub fn new(config: StoreConfig, storage: Option<SharedStorage>, sink: Arc<dyn AlertSink>) -> Self {
        // ---
        let preferences = Arc::new(match &storage {
            Some(storage) => PreferenceRegistry::with_storage(Arc::clone(storage)),
            None => PreferenceRegistry::new(),
        });
        let bus = EventBus::new();
        let alerts = Arc::new(AlertEngine::new(preferences.clone(), sink));

        let store = Store::new(config, bus.clone(), Arc::clone(&alerts));
        let store = match storage {
            Some(storage) => store.with_storage(storage),
            None => store,
        };

        Self {
            store: Arc::new(store),
            alerts,
            preferences,
            bus,
        }
    }

    /// Restore preferences, then histories, from storage.
    pub async fn hydrate(&self) {
        // ---
        let prefs = self.preferences.hydrate().await;
        let devices = self.store.hydrate().await;
        tracing::info!(preferences = prefs, devices, "Pipeline state restored");
    }
}

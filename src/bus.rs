//! In-process live fanout of newly ingested readings.
//!
//! Subscribers are plain callbacks. There is no buffering: a viewer that is
//! not subscribed when a reading is published never sees it. Callbacks are
//! expected to hand the reading off quickly (the SSE route does a
//! non-blocking push into a bounded per-viewer queue); the bus does not
//! bound their run time itself.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use uuid::Uuid;

use crate::models::Reading;

// ---

type Callback = Arc<dyn Fn(&Reading) + Send + Sync>;

#[derive(Default)]
struct Registry {
    subscribers: Mutex<HashMap<Uuid, Callback>>,
}

impl Registry {
    fn remove(&self, id: &Uuid) -> bool {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }
}

/// Publish/subscribe hub for live viewers. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl EventBus {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`; it stays registered until the returned
    /// [`Subscription`] is dropped or explicitly unsubscribed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Reading) + Send + Sync + 'static,
    {
        // ---
        let id = Uuid::new_v4();
        self.registry
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(callback));

        tracing::debug!(subscription = %id, "Live viewer subscribed");
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Invoke every currently registered callback with `reading`.
    ///
    /// Iterates over a snapshot, so callbacks may subscribe or unsubscribe
    /// (including themselves) while the fanout is running. A panicking
    /// callback is logged and skipped; the rest still receive the reading.
    pub fn publish(&self, reading: &Reading) {
        // ---
        let snapshot: Vec<(Uuid, Callback)> = self
            .registry
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect();

        for (id, callback) in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(reading))).is_err() {
                tracing::error!(
                    subscription = %id,
                    device_id = %reading.device_id,
                    "Live viewer callback panicked, continuing fanout"
                );
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Handle for one registered callback; dropping it unsubscribes.
pub struct Subscription {
    id: Uuid,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Deregister now instead of waiting for drop.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if registry.remove(&self.id) {
                tracing::debug!(subscription = %self.id, "Live viewer unsubscribed");
            }
        }
    }
}

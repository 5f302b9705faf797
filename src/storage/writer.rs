//! Ordered write-behind queue in front of a [`Storage`] backend.
//!
//! Callers enqueue a value (or a delete) per key and return immediately.
//! One writer task per queue applies the changes one at a time, so two
//! changes to the same key always land in the order they were made. A key
//! that changes again before the writer gets to it only has its newest
//! value written. Values are encoded to JSON on the writer task, not on the
//! caller's thread.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use super::SharedStorage;

// ---

type Encode = Box<dyn FnOnce() -> serde_json::Result<Value> + Send>;

enum PendingOp {
    Write(Encode),
    Delete,
}

type Pending = Arc<Mutex<HashMap<String, PendingOp>>>;

/// Per-key ordered, coalescing write-through to a shared backend.
pub struct WriteBehind {
    storage: SharedStorage,
    pending: Pending,
    /// Wakes the writer task; created with the task on first use.
    wake: Mutex<Option<mpsc::Sender<()>>>,
}

impl WriteBehind {
    // ---
    pub fn new(storage: SharedStorage) -> Self {
        Self {
            storage,
            pending: Arc::default(),
            wake: Mutex::new(None),
        }
    }

    /// The backend, for reads during hydration.
    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    /// Queue `value` to be stored under `key`, replacing any change to the
    /// same key that has not been applied yet.
    pub fn write<T>(&self, key: String, value: T)
    where
        T: Serialize + Send + 'static,
    {
        self.enqueue(key, PendingOp::Write(Box::new(move || serde_json::to_value(value))));
    }

    /// Queue removal of `key`.
    pub fn delete(&self, key: String) {
        self.enqueue(key, PendingOp::Delete);
    }

    /// Number of keys waiting for the writer.
    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }

    fn enqueue(&self, key: String, op: PendingOp) {
        // ---
        lock(&self.pending).insert(key, op);

        let mut wake = self.wake.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = wake.as_ref() {
            match tx.try_send(()) {
                // Full: a wakeup is already queued and will see this key.
                Ok(()) | Err(mpsc::error::TrySendError::Full(())) => return,
                // The runtime that ran the writer is gone; start a new one.
                Err(mpsc::error::TrySendError::Closed(())) => *wake = None,
            }
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // Kept pending; flushed once a change is made inside a runtime.
            tracing::debug!("No runtime available, deferring persistence");
            return;
        };
        let (tx, rx) = mpsc::channel(1);
        handle.spawn(run_writer(rx, Arc::clone(&self.pending), Arc::clone(&self.storage)));
        let _ = tx.try_send(());
        *wake = Some(tx);
    }
}

fn lock(pending: &Pending) -> std::sync::MutexGuard<'_, HashMap<String, PendingOp>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drain pending changes on every wakeup. Exits once the queue is dropped.
async fn run_writer(mut wake: mpsc::Receiver<()>, pending: Pending, storage: SharedStorage) {
    // ---
    while wake.recv().await.is_some() {
        flush(&pending, &storage).await;
    }
    flush(&pending, &storage).await;
}

async fn flush(pending: &Pending, storage: &SharedStorage) {
    // ---
    loop {
        let batch = std::mem::take(&mut *lock(pending));
        if batch.is_empty() {
            return;
        }
        for (key, op) in batch {
            apply(storage, &key, op).await;
        }
    }
}

async fn apply(storage: &SharedStorage, key: &str, op: PendingOp) {
    // ---
    match op {
        PendingOp::Write(encode) => {
            let value = match encode() {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(%key, error = %e, "Could not encode value for persistence");
                    return;
                }
            };
            if let Err(e) = storage.write(key, value).await {
                tracing::warn!(%key, error = %e, "Persisting value failed, keeping in-memory copy");
            }
        }
        PendingOp::Delete => {
            if let Err(e) = storage.delete(key).await {
                tracing::warn!(%key, error = %e, "Deleting persisted value failed");
            }
        }
    }
}

//! Live reading stream over server-sent events.
//!
//! Each connection registers one bus subscription whose callback pushes into
//! a bounded channel without waiting. A viewer that stops reading misses
//! readings once its queue is full, the same as a viewer that was never
//! subscribed. The subscription is owned by the response stream: when the
//! client goes away axum drops the stream and the viewer is unsubscribed.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};

use super::AppState;
use crate::models::Reading;

// ---

/// Readings buffered per viewer before new ones are dropped.
pub const VIEWER_QUEUE_CAPACITY: usize = 256;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/stream", get(stream))
}

async fn stream(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // ---
    let (tx, rx) = mpsc::channel::<Reading>(VIEWER_QUEUE_CAPACITY);
    let subscription = state.pipeline.bus.subscribe(forward_to(tx));
    tracing::info!(subscription = %subscription.id(), "Live viewer connected");

    let events = ReceiverStream::new(rx).map(move |reading| {
        let _owned = &subscription;
        Ok(reading_event(&reading))
    });

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(u64::from(state.config.heartbeat_secs)))
            .text("heartbeat"),
    )
}

/// Bus callback feeding one viewer's queue. Never blocks the publisher.
fn forward_to(tx: mpsc::Sender<Reading>) -> impl Fn(&Reading) + Send + Sync + 'static {
    // ---
    let lagging = AtomicBool::new(false);
    move |reading| match tx.try_send(reading.clone()) {
        Ok(()) => {
            if lagging.swap(false, Ordering::Relaxed) {
                tracing::info!("Live viewer caught up");
            }
        }
        Err(TrySendError::Full(dropped)) => {
            if !lagging.swap(true, Ordering::Relaxed) {
                tracing::warn!(device_id = %dropped.device_id, "Live viewer is not reading, dropping readings");
            }
        }
        // Receiver gone means the stream is being torn down.
        Err(TrySendError::Closed(_)) => {}
    }
}

fn reading_event(reading: &Reading) -> Event {
    // ---
    let event = Event::default().event("reading");
    match serde_json::to_string(reading) {
        Ok(json) => event.data(json),
        Err(e) => {
            tracing::warn!(device_id = %reading.device_id, error = %e, "Could not encode reading for stream");
            event.comment("encode error")
        }
    }
}

//! Synthetic demo devices.
//!
//! Feeds `Demo-1..N` through the normal ingestion path with `is_demo` set,
//! so dashboards and the live stream have something to show. Demo readings
//! never raise alerts and are left out of device counts.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::models::Reading;
use crate::store::Store;

// ---

/// Deterministic, gently oscillating reading for demo device `index` at `tick`.
pub fn demo_reading(index: u32, tick: u64) -> Reading {
    // ---
    let phase = tick as f64 / 12.0 + f64::from(index);
    Reading {
        device_id: format!("Demo-{}", index + 1),
        timestamp: Utc::now(),
        temperature_c: 21.0 + f64::from(index) + 3.0 * phase.sin(),
        humidity_pct: Some(45.0 + 10.0 * (phase / 2.0).cos()),
        rssi: Some(-55 - (index as i32 % 4) * 5),
        is_demo: true,
    }
}

/// Spawn the generator; it runs until the returned handle is aborted.
pub fn spawn(store: Arc<Store>, devices: u32, interval: Duration) -> JoinHandle<()> {
    // ---
    tracing::info!(devices, interval_secs = interval.as_secs(), "Starting demo generator");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut tick: u64 = 0;
        loop {
            ticker.tick().await;
            for index in 0..devices {
                store.add(demo_reading(index, tick));
            }
            tick = tick.wrapping_add(1);
        }
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_demo_readings_are_flagged_and_plausible() {
        // ---
        for tick in 0..100 {
            let r = demo_reading(2, tick);
            assert_eq!(r.device_id, "Demo-3");
            assert!(r.is_demo);
            assert!((20.0..=27.0).contains(&r.temperature_c));
        }
    }
}

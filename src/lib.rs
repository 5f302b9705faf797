//! Sensor ingestion, live fanout and threshold alerting.
//!
//! Readings enter through [`Store::add`], which keeps a bounded, TTL-pruned
//! history per device, pushes the reading to every live viewer on the
//! [`EventBus`] and runs it through the hysteresis [`AlertEngine`]. Alert
//! transitions go to the [`NotificationDispatcher`], which delivers them on
//! a detached task.
//!
//! Module boundaries follow the same gateway layout as the binary: each
//! module exposes a narrow surface, re-exported here, and `routes` only
//! exports its combined router.

pub mod alerts;
pub mod bus;
pub mod config;
pub mod demo;
pub mod error;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod preferences;
pub mod routes;
pub mod schema;
pub mod storage;
pub mod store;

pub use alerts::{AlertEngine, AlertMode, Transition, DEVICE_WIDE_VIEWER};
pub use bus::{EventBus, Subscription};
pub use config::Config;
pub use models::{ActiveAlert, AlertVariant, IngestPayload, Reading, ThresholdConfig};
pub use notify::{AlertSink, NotificationDispatcher};
pub use pipeline::Pipeline;
pub use preferences::{DevicePreferenceProvider, DevicePreferences, PreferenceRegistry};
pub use storage::{MemoryStorage, PgStorage, SharedStorage, Storage, WriteBehind};
pub use store::{Store, StoreConfig};

//! Storage capability shared by every persisted piece of the pipeline.
//!
//! The store and the preference registry only ever see [`Storage`]; which
//! backend sits behind it is decided once in `main.rs`. Writes from the
//! ingestion path go through [`WriteBehind`]: they are applied in order by a
//! background task, and a failing backend is logged, never surfaced to the
//! caller.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;

mod memory;
mod postgres;
mod writer;

pub use memory::MemoryStorage;
pub use postgres::PgStorage;
pub use writer::WriteBehind;

#[cfg(test)]
pub(crate) use writer::tests::SlowWrites;

// ---

/// Key/value persistence with JSON values.
#[async_trait]
pub trait Storage: Send + Sync {
    // ---
    async fn read(&self, key: &str) -> Result<Option<Value>, StorageError>;

    async fn write(&self, key: &str, value: Value) -> Result<(), StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// All keys starting with `prefix`, in no particular order.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

pub type SharedStorage = Arc<dyn Storage>;

//! PostgreSQL storage backend.
//!
//! Values live in the single `kv_store` table created by
//! [`crate::schema::create_schema`].

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use super::Storage;
use crate::error::StorageError;

// ---

#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Storage for PgStorage {
    // ---
    async fn read(&self, key: &str) -> Result<Option<Value>, StorageError> {
        // ---
        let row: Option<(Value,)> = sqlx::query_as("SELECT value FROM kv_store WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn write(&self, key: &str, value: Value) -> Result<(), StorageError> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        // ---
        sqlx::query("DELETE FROM kv_store WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        // ---
        let rows: Vec<(String,)> = sqlx::query_as("SELECT key FROM kv_store WHERE starts_with(key, $1)")
            .bind(prefix)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|(key,)| key).collect())
    }
}

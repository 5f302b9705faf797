//! Database schema management for `sensorflow-alerts`.
//!
//! Ensures the key/value table behind [`crate::storage::PgStorage`] exists
//! before the pipeline hydrates from it. Applied once on startup from
//! `main.rs`, and only when `DATABASE_URL` is configured.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Safe to call on every startup; no-op if objects already exist.
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Device histories (`history:<device>`) and preferences (`prefs:<device>`)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv_store (
            key         TEXT        PRIMARY KEY,
            value       JSONB       NOT NULL,
            updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_kv_store_prefix
            ON kv_store (key text_pattern_ops);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

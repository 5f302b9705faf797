//! Application entry point for the `sensorflow-alerts` service.
//!
//! This binary orchestrates the full startup sequence, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Selecting the storage backend (PostgreSQL when `DATABASE_URL` is set,
//!   in-memory otherwise) and restoring persisted state from it
//! - Building the notification dispatcher from the configured channels
//! - Optionally starting the demo reading generator
//! - Mounting all API routes via the `routes` gateway
//! - Binding the Axum HTTP server and serving requests
//!
//! # Environment Variables
//! See [`sensorflow_alerts::config::load_from_env`] for the service settings.
//! - `SENSORFLOW_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `SENSORFLOW_SPAN_EVENTS` (optional) – span event mode for tracing
use std::{env, io::IsTerminal, sync::Arc, time::Duration};

use anyhow::Result;
use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use sensorflow_alerts::{
    config, demo, routes, schema, Config, MemoryStorage, NotificationDispatcher, PgStorage,
    Pipeline, SharedStorage, StoreConfig,
};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let storage = connect_storage(&cfg).await;

    let dispatcher = NotificationDispatcher::from_config(cfg.email.clone(), cfg.sms.clone());
    tracing::info!(channels = ?dispatcher.channel_names(), "Notification channels ready");

    let store_config = StoreConfig {
        capacity: cfg.history_capacity as usize,
        ttl: cfg.reading_ttl(),
    };
    let pipeline = Pipeline::new(store_config, Some(storage), Arc::new(dispatcher));
    pipeline.hydrate().await;

    if cfg.demo_devices > 0 {
        demo::spawn(
            Arc::clone(&pipeline.store),
            cfg.demo_devices,
            Duration::from_secs(u64::from(cfg.demo_interval_secs)),
        );
    }

    // Build app from routes gateway
    let addr = cfg.bind_addr;
    let app: Router = routes::router(pipeline, cfg);

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---

/// Pick the storage backend.
///
/// A database that cannot be reached or prepared is not fatal: the service
/// falls back to in-memory storage and keeps ingesting.
async fn connect_storage(cfg: &Config) -> SharedStorage {
    // ---
    let Some(db_url) = &cfg.db_url else {
        tracing::info!("DATABASE_URL not set, using in-memory storage");
        return Arc::new(MemoryStorage::new());
    };

    let pool = match PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .acquire_timeout(Duration::from_secs(5))
        .connect(db_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Failed to connect to database, using in-memory storage: {}", e);
            return Arc::new(MemoryStorage::new());
        }
    };

    if let Err(e) = schema::create_schema(&pool).await {
        tracing::error!("Failed to create schema, using in-memory storage: {}", e);
        return Arc::new(MemoryStorage::new());
    }

    tracing::info!("Successfully connected to database");
    Arc::new(PgStorage::new(pool))
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `SENSORFLOW_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by `RUST_LOG`, else the `SENSORFLOW_LOG_LEVEL` env var
///
/// Called once at startup, before any tracing macro runs.
fn init_tracing() {
    // ---
    let span_events = match env::var("SENSORFLOW_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to SENSORFLOW_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("SENSORFLOW_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,hyper=info,reqwest=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}

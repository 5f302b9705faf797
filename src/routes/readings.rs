use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::AppState;
use crate::error::ApiError;
use crate::models::{IngestPayload, Reading};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/readings", post(ingest))
        .route("/api/readings/latest", get(list_latest))
        .route("/api/devices/{device_id}/latest", get(device_latest))
        .route("/api/devices/{device_id}/history", get(device_history))
        .route("/api/stats", get(stats))
}

#[derive(Debug, Default, Deserialize)]
struct IngestQuery {
    #[serde(default)]
    demo: bool,
}

/// Ingestion boundary: validate, stamp server time and demo flag, hand off.
async fn ingest(
    State(state): State<AppState>,
    Query(params): Query<IngestQuery>,
    payload: Result<Json<IngestPayload>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    // ---
    let Json(payload) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let reading = payload.into_reading(Utc::now(), params.demo)?;

    debug!(device_id = %reading.device_id, "POST /api/readings");
    state.pipeline.store.add(reading.clone());

    Ok((StatusCode::ACCEPTED, Json(reading)))
}

async fn list_latest(State(state): State<AppState>) -> Json<Vec<Reading>> {
    // ---
    let ttl = state.config.reading_ttl();
    Json(state.pipeline.store.list_latest(ttl))
}

async fn device_latest(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<Reading>, ApiError> {
    // ---
    state
        .pipeline
        .store
        .latest(&device_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("unknown device '{device_id}'")))
}

async fn device_history(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<Vec<Reading>>, ApiError> {
    // ---
    let history = state.pipeline.store.history(&device_id);
    if history.is_empty() {
        return Err(ApiError::NotFound(format!("unknown device '{device_id}'")));
    }
    Ok(Json(history))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    active_devices: usize,
    total_devices: usize,
    active_alerts: usize,
    live_viewers: usize,
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    // ---
    let pipeline = &state.pipeline;
    Json(StatsResponse {
        active_devices: pipeline.store.active_device_count(state.config.reading_ttl()),
        total_devices: pipeline.store.total_device_count(),
        active_alerts: pipeline.alerts.list_active().len(),
        live_viewers: pipeline.bus.subscriber_count(),
    })
}

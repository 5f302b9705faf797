//! Threshold and label administration.
//!
//! Every threshold edit is followed by `AlertEngine::thresholds_changed` so
//! that alerts whose thresholds disappeared are cleared right away instead of
//! lingering until the device reports again.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::ApiError;
use crate::models::ThresholdConfig;
use crate::preferences::{DevicePreferenceProvider, DevicePreferences};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/devices/{device_id}/preferences", get(get_preferences))
        .route(
            "/api/devices/{device_id}/thresholds",
            put(set_thresholds).delete(remove_thresholds),
        )
        .route("/api/devices/{device_id}/label", put(set_label))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThresholdRequest {
    /// Absent for the device-level threshold.
    viewer: Option<String>,
    low_c: Option<f64>,
    high_c: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ViewerQuery {
    viewer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LabelRequest {
    viewer: Option<String>,
    label: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChangeResponse {
    preferences: DevicePreferences,
    cleared_alerts: usize,
}

async fn get_preferences(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Json<DevicePreferences> {
    Json(state.pipeline.preferences.preferences(&device_id))
}

async fn set_thresholds(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    body: Result<Json<ThresholdRequest>, JsonRejection>,
) -> Result<Json<ChangeResponse>, ApiError> {
    // ---
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let thresholds = validate_thresholds(request.low_c, request.high_c)?;

    let prefs = &state.pipeline.preferences;
    match non_blank(request.viewer) {
        Some(viewer) => prefs.set_viewer_threshold(&device_id, &viewer, thresholds),
        None => prefs.set_device_threshold(&device_id, thresholds),
    }

    Ok(Json(applied(&state, &device_id)))
}

async fn remove_thresholds(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<ViewerQuery>,
) -> Json<ChangeResponse> {
    // ---
    let prefs = &state.pipeline.preferences;
    match non_blank(params.viewer) {
        Some(viewer) => prefs.remove_viewer_threshold(&device_id, &viewer),
        None => prefs.clear_thresholds(&device_id),
    }

    Json(applied(&state, &device_id))
}

async fn set_label(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    body: Result<Json<LabelRequest>, JsonRejection>,
) -> Result<Json<DevicePreferences>, ApiError> {
    // ---
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let label = non_blank(request.label);

    let prefs = &state.pipeline.preferences;
    match non_blank(request.viewer) {
        Some(viewer) => prefs.set_viewer_label(&device_id, &viewer, label),
        None => prefs.set_label(&device_id, label),
    }

    Ok(Json(prefs.preferences(&device_id)))
}

/// Re-sync alert state with the edited preferences.
fn applied(state: &AppState, device_id: &str) -> ChangeResponse {
    // ---
    let cleared = state.pipeline.alerts.thresholds_changed(device_id);
    ChangeResponse {
        preferences: state.pipeline.preferences.preferences(device_id),
        cleared_alerts: cleared.len(),
    }
}

fn validate_thresholds(low_c: Option<f64>, high_c: Option<f64>) -> Result<ThresholdConfig, ApiError> {
    // ---
    for (field, value) in [("lowC", low_c), ("highC", high_c)] {
        if value.is_some_and(|v| !v.is_finite()) {
            return Err(ApiError::BadRequest(format!("{field} must be a finite number")));
        }
    }
    if let (Some(low), Some(high)) = (low_c, high_c) {
        if low >= high {
            return Err(ApiError::BadRequest("lowC must be below highC".into()));
        }
    }
    Ok(ThresholdConfig { low_c, high_c })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

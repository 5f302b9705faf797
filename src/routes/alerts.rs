use axum::{extract::State, routing::get, Json, Router};

use super::AppState;
use crate::models::ActiveAlert;

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/api/alerts", get(list_active))
}

/// Current breaches across all devices and viewers.
async fn list_active(State(state): State<AppState>) -> Json<Vec<ActiveAlert>> {
    Json(state.pipeline.alerts.list_active())
}

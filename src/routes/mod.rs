use axum::Router;

use crate::{Config, Pipeline};

mod alerts;
mod health;
mod preferences;
mod readings;
mod stream;

// ---

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub config: Config,
}

pub fn router(pipeline: Pipeline, config: Config) -> Router {
    // ---
    Router::new()
        .merge(readings::router())
        .merge(stream::router())
        .merge(alerts::router())
        .merge(preferences::router())
        .merge(health::router())
        .with_state(AppState { pipeline, config })
}

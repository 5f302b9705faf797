//! Error types for the pipeline and its HTTP boundary.
//!
//! Nothing in here is allowed to escape `Store::add`: storage and
//! notification errors are logged where they happen, and validation errors
//! are turned into `400` responses before a reading ever reaches the store.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// ---

/// Rejection reasons for a malformed ingestion payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("deviceId must be a non-empty string")]
    MissingDeviceId,

    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{0} must be a finite number")]
    NotFinite(&'static str),
}

/// Failures reported by a `Storage` backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Delivery failure on one notification channel.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("{channel} request failed: {source}")]
    Transport {
        channel: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{channel} rejected notification with status {status}")]
    Rejected {
        channel: &'static str,
        status: reqwest::StatusCode,
    },
}

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        let body = Json(json!({ "error": self.to_string() }));

        (status, body).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

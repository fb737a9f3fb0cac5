//! Structured error responses for the admin API.

use crate::settings::SettingsError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use deskrelay_core::RouterError;
use thiserror::Error;

/// Errors surfaced to admin API callers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Unknown device on a history lookup.
    #[error("Client not found")]
    NotFound,

    /// Target device is unknown or has no live connection.
    #[error("Client not connected or offline")]
    DeviceUnreachable,

    /// Malformed or unacceptable settings.
    #[error("{0}")]
    InvalidConfig(String),

    /// Malformed request body.
    #[error("{0}")]
    BadRequest(String),

    /// Anything else.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound | ApiError::DeviceUnreachable => StatusCode::NOT_FOUND,
            ApiError::InvalidConfig(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RouterError> for ApiError {
    fn from(e: RouterError) -> Self {
        match e {
            RouterError::NotFound(_) => ApiError::NotFound,
            RouterError::DeviceUnreachable(_) => ApiError::DeviceUnreachable,
        }
    }
}

impl From<SettingsError> for ApiError {
    fn from(e: SettingsError) -> Self {
        match e {
            SettingsError::Invalid(msg) => ApiError::InvalidConfig(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

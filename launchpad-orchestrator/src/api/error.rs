//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use launchpad_core::dto::deploy::ErrorResponse;

use crate::service::registry::{CancelError, TriggerError};

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Configuration(String),
    AlreadyRunning(String),
    Conflict(String),
    Unauthorized,
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Configuration(_) => (StatusCode::BAD_REQUEST, "configuration"),
            ApiError::AlreadyRunning(_) => (StatusCode::CONFLICT, "already_running"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        let message = match self {
            ApiError::NotFound(msg)
            | ApiError::Configuration(msg)
            | ApiError::AlreadyRunning(msg)
            | ApiError::Conflict(msg) => msg,
            ApiError::Unauthorized => "missing or invalid credential".to_string(),
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                kind: kind.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<TriggerError> for ApiError {
    fn from(err: TriggerError) -> Self {
        match err {
            TriggerError::UnknownTarget(_) => ApiError::NotFound(err.to_string()),
            TriggerError::Configuration(_) => ApiError::Configuration(err.to_string()),
            TriggerError::AlreadyRunning { .. } => ApiError::AlreadyRunning(err.to_string()),
        }
    }
}

impl From<CancelError> for ApiError {
    fn from(err: CancelError) -> Self {
        match err {
            CancelError::UnknownTarget(_) => ApiError::NotFound(err.to_string()),
            CancelError::NotRunning(_) => ApiError::Conflict(err.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

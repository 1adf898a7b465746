//! Error types for the Launchpad client

use launchpad_core::dto::deploy::ErrorResponse;
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when using the Launchpad client
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Machine-readable tag from the error body, when there was one
        kind: Option<String>,
        /// Error message from the API
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// The event stream ended before the run finished
    #[error("Event stream interrupted: {0}")]
    StreamInterrupted(String),
}

impl ClientError {
    /// Create an API error from status code and response body
    ///
    /// Bodies in the orchestrator's `{error, kind}` shape are unpacked; any
    /// other body is kept verbatim as the message.
    pub fn api_error(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(parsed) => Self::ApiError {
                status,
                kind: Some(parsed.kind),
                message: parsed.error,
            },
            Err(_) => Self::ApiError {
                status,
                kind: None,
                message: body,
            },
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Check if the target already had a deployment in flight
    pub fn is_already_running(&self) -> bool {
        matches!(self, Self::ApiError { kind: Some(kind), .. } if kind == "already_running")
    }

    /// Check if the credential was missing or rejected
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::ApiError { status: 401, .. })
    }

    /// Check if this error is a client error (4xx status)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 400 && *status < 500)
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 500)
    }
}

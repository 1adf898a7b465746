//! Launchpad HTTP Client
//!
//! A simple, type-safe HTTP client for communicating with the Launchpad
//! orchestrator API.
//!
//! # Example
//!
//! ```no_run
//! use launchpad_client::LaunchpadClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = LaunchpadClient::new("http://localhost:8000").with_token("secret");
//!
//!     let accepted = client.trigger("backend").await?;
//!     println!("Deployment started: {}", accepted.run_id);
//!     Ok(())
//! }
//! ```

mod deploy;
pub mod error;
mod runs;
pub mod sse;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use launchpad_core::dto::stream::StreamFrame;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

/// HTTP client for the Launchpad orchestrator API
///
/// Endpoints are grouped into:
/// - Deployments (list targets, trigger, cancel)
/// - Runs (target status, run snapshot, live event stream)
#[derive(Debug, Clone)]
pub struct LaunchpadClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8000")
    base_url: String,
    /// Bearer credential sent with trigger and cancel calls
    token: Option<String>,
    /// HTTP client instance
    client: Client,
}

impl LaunchpadClient {
    /// Create a new orchestrator client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the orchestrator API (e.g., "http://localhost:8000")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new orchestrator client with a custom HTTP client
    ///
    /// This allows you to configure proxies, TLS settings, etc. Avoid a
    /// global request timeout if you follow event streams.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            client,
        }
    }

    /// Sets the caller credential
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    ///
    /// This method checks the status code and returns an appropriate error if
    /// the request failed, or deserializes the response body if successful.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = self.check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Turns a non-success response into `ClientError::ApiError`
    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(response)
    }
}

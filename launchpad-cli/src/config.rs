//! Configuration module
//!
//! Handles CLI configuration including orchestrator URL and credentials.

use launchpad_client::LaunchpadClient;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the orchestrator service
    pub orchestrator_url: String,
    /// Credential for state-changing requests
    pub token: Option<String>,
}

impl Config {
    /// Builds an API client for the configured orchestrator
    pub fn client(&self) -> LaunchpadClient {
        let client = LaunchpadClient::new(&self.orchestrator_url);
        match &self.token {
            Some(token) if !token.is_empty() => client.with_token(token),
            _ => client,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_uses_configured_url() {
        let config = Config {
            orchestrator_url: "http://deploy.internal:8000/".to_string(),
            token: Some(String::new()),
        };
        assert_eq!(config.client().base_url(), "http://deploy.internal:8000");
    }
}

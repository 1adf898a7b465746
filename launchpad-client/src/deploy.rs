//! Deployment endpoints

use crate::LaunchpadClient;
use crate::error::Result;
use launchpad_core::domain::run::PipelineRun;
use launchpad_core::domain::target::TargetSpec;
use launchpad_core::dto::deploy::TriggerResponse;

impl LaunchpadClient {
    /// List the targets the orchestrator can deploy
    pub async fn list_targets(&self) -> Result<Vec<TargetSpec>> {
        let url = format!("{}/targets", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Start a deployment of `target`
    ///
    /// # Returns
    /// The accepted run's identifier. Fails with an `already_running` API
    /// error when the target has a deployment in flight.
    pub async fn trigger(&self, target: &str) -> Result<TriggerResponse> {
        let url = format!("{}/deploy/{}", self.base_url, target);
        let response = self.authorized(self.client.post(&url)).send().await?;

        self.handle_response(response).await
    }

    /// Request cancellation of the target's in-flight deployment
    pub async fn cancel(&self, target: &str) -> Result<PipelineRun> {
        let url = format!("{}/deploy/{}/cancel", self.base_url, target);
        let response = self.authorized(self.client.post(&url)).send().await?;

        self.handle_response(response).await
    }
}

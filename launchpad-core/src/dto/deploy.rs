//! Deployment DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::{PipelineRun, RunStatus};

/// Response to an accepted deployment trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub run_id: Uuid,
    pub target: String,
    pub status: RunStatus,
}

impl From<&PipelineRun> for TriggerResponse {
    fn from(run: &PipelineRun) -> Self {
        Self {
            run_id: run.id,
            target: run.target().to_string(),
            status: run.status,
        }
    }
}

/// Error body returned by every failing API call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Machine-readable error tag (`already_running`, `configuration`, ...)
    pub kind: String,
}

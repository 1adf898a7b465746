//! Pipeline run domain types
//!
//! A `PipelineRun` is the mutable record of one execution. The transition
//! methods below are the only way the orchestrator changes it, and they
//! enforce the run invariants:
//! - the overall status never leaves a terminal state
//! - stage results are appended in canonical stage order
//! - a stage result is never rewritten once it is terminal

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::context::PipelineContext;
use crate::domain::stage::{StageError, StageName, StageResult, StageStatus};

/// Overall status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Aborted
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// One execution instance of the full stage sequence for a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub context: PipelineContext,
    pub status: RunStatus,
    /// Index into `stages` of the stage currently executing
    pub current_stage_index: Option<usize>,
    pub stages: Vec<StageResult>,
    pub requested_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(context: PipelineContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            context,
            status: RunStatus::Pending,
            current_stage_index: None,
            stages: Vec::new(),
            requested_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn target(&self) -> &str {
        &self.context.target
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// pending -> running
    pub fn start(&mut self) -> bool {
        if self.status != RunStatus::Pending {
            return false;
        }
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        true
    }

    /// Next stage that has no result yet
    pub fn next_stage(&self) -> Option<StageName> {
        StageName::ALL.get(self.stages.len()).copied()
    }

    /// Appends a running result for `stage`
    ///
    /// Refused unless the run is running, the previous stage is terminal and
    /// `stage` is the next stage in canonical order.
    pub fn begin_stage(&mut self, stage: StageName) -> bool {
        if self.status != RunStatus::Running || self.next_stage() != Some(stage) {
            return false;
        }
        if self.stages.last().is_some_and(|s| !s.status.is_terminal()) {
            return false;
        }
        self.stages.push(StageResult::running(stage));
        self.current_stage_index = Some(self.stages.len() - 1);
        true
    }

    /// Appends output to the running stage, keeping the last `limit` bytes
    pub fn append_output(&mut self, stage: StageName, text: &str, limit: usize) -> bool {
        match self.running_stage_mut(stage) {
            Some(result) => {
                result.append_output(text, limit);
                true
            }
            None => false,
        }
    }

    /// Marks the running stage terminal
    pub fn finish_stage(
        &mut self,
        stage: StageName,
        status: StageStatus,
        exit_code: Option<i32>,
        error: Option<StageError>,
    ) -> bool {
        if !status.is_terminal() {
            return false;
        }
        let Some(result) = self.running_stage_mut(stage) else {
            return false;
        };
        result.status = status;
        result.exit_code = exit_code;
        result.error = error;
        result.completed_at = Some(Utc::now());
        self.current_stage_index = None;
        true
    }

    /// Records `stage` as skipped without running it
    pub fn skip_stage(&mut self, stage: StageName, reason: &str) -> bool {
        if self.is_terminal() || self.next_stage() != Some(stage) {
            return false;
        }
        if self.stages.last().is_some_and(|s| !s.status.is_terminal()) {
            return false;
        }
        self.stages.push(StageResult::skipped(stage, reason));
        true
    }

    /// Records every stage without a result as skipped; returns the skipped names
    pub fn skip_remaining(&mut self, reason: &str) -> Vec<StageName> {
        let mut skipped = Vec::new();
        while let Some(stage) = self.next_stage() {
            if !self.skip_stage(stage, reason) {
                break;
            }
            skipped.push(stage);
        }
        skipped
    }

    /// Moves the run to a terminal status exactly once
    pub fn finish(&mut self, status: RunStatus) -> bool {
        if !status.is_terminal() || self.is_terminal() {
            return false;
        }
        self.status = status;
        self.current_stage_index = None;
        self.completed_at = Some(Utc::now());
        true
    }

    /// First failed stage, if any
    pub fn failed_stage(&self) -> Option<&StageResult> {
        self.stages
            .iter()
            .find(|s| s.status == StageStatus::Failed)
    }

    fn running_stage_mut(&mut self, stage: StageName) -> Option<&mut StageResult> {
        let index = self.current_stage_index?;
        self.stages
            .get_mut(index)
            .filter(|s| s.stage == stage && s.status == StageStatus::Running)
    }
}

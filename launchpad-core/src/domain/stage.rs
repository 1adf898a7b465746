//! Stage domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The five pipeline stages
///
/// Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StageName {
    Git,
    Sonar,
    Docker,
    Deploy,
    Pentest,
}

impl StageName {
    /// Canonical stage order
    pub const ALL: [StageName; 5] = [
        StageName::Git,
        StageName::Sonar,
        StageName::Docker,
        StageName::Deploy,
        StageName::Pentest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Git => "GIT",
            StageName::Sonar => "SONAR",
            StageName::Docker => "DOCKER",
            StageName::Deploy => "DEPLOY",
            StageName::Pentest => "PENTEST",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single stage within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StageStatus::Running)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Running => write!(f, "running"),
            StageStatus::Succeeded => write!(f, "succeeded"),
            StageStatus::Failed => write!(f, "failed"),
            StageStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Why a stage failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageErrorKind {
    /// Remote host unreachable or session dropped
    Connection,
    /// Stage exceeded its allotted duration
    Timeout,
    /// A remote command exited non-zero
    CommandFailure,
    /// Operator cancelled the run while this stage was in flight
    Cancelled,
}

/// Failure details attached to a failed stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub kind: StageErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(kind: StageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Outcome record of one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageName,
    pub status: StageStatus,
    pub exit_code: Option<i32>,
    /// Tail of the stage's combined output
    pub output: String,
    pub error: Option<StageError>,
    /// Why the stage was skipped, when it was
    pub skip_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StageResult {
    pub fn running(stage: StageName) -> Self {
        Self {
            stage,
            status: StageStatus::Running,
            exit_code: None,
            output: String::new(),
            error: None,
            skip_reason: None,
            started_at: Some(Utc::now()),
            completed_at: None,
        }
    }

    pub fn skipped(stage: StageName, reason: impl Into<String>) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            exit_code: None,
            output: String::new(),
            error: None,
            skip_reason: Some(reason.into()),
            started_at: None,
            completed_at: Some(Utc::now()),
        }
    }

    /// Appends output, keeping only the last `limit` bytes
    ///
    /// Truncation happens on a char boundary so the tail stays valid UTF-8.
    pub fn append_output(&mut self, text: &str, limit: usize) {
        self.output.push_str(text);
        if self.output.len() > limit {
            let mut cut = self.output.len() - limit;
            while !self.output.is_char_boundary(cut) {
                cut += 1;
            }
            self.output.drain(..cut);
        }
    }
}

//! Log domain types
//!
//! Events broadcast live to observers of a running pipeline. They are
//! ephemeral; the durable record of a run is its `StageResult` list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::RunStatus;
use crate::domain::stage::{StageName, StageStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Which remote stream an output chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A timestamped event published for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: LogEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEventKind {
    /// A fragment of remote command output
    Output {
        stage: StageName,
        stream: OutputStream,
        text: String,
    },
    /// A stage changed status
    StageTransition {
        stage: StageName,
        status: StageStatus,
        exit_code: Option<i32>,
    },
    /// The run changed status
    RunTransition { status: RunStatus },
    /// An orchestrator note for the operator
    Message {
        level: LogLevel,
        stage: Option<StageName>,
        text: String,
    },
}

impl LogEvent {
    pub fn new(run_id: Uuid, kind: LogEventKind) -> Self {
        Self {
            run_id,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn output(run_id: Uuid, stage: StageName, stream: OutputStream, text: &str) -> Self {
        Self::new(
            run_id,
            LogEventKind::Output {
                stage,
                stream,
                text: text.to_string(),
            },
        )
    }

    pub fn stage_transition(
        run_id: Uuid,
        stage: StageName,
        status: StageStatus,
        exit_code: Option<i32>,
    ) -> Self {
        Self::new(
            run_id,
            LogEventKind::StageTransition {
                stage,
                status,
                exit_code,
            },
        )
    }

    pub fn run_transition(run_id: Uuid, status: RunStatus) -> Self {
        Self::new(run_id, LogEventKind::RunTransition { status })
    }

    pub fn message(
        run_id: Uuid,
        level: LogLevel,
        stage: Option<StageName>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            run_id,
            LogEventKind::Message {
                level,
                stage,
                text: text.into(),
            },
        )
    }

    /// True for the event that ends a run's stream
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, LogEventKind::RunTransition { status } if status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let run_id = Uuid::new_v4();
        let event = LogEvent::output(run_id, StageName::Docker, OutputStream::Stderr, "step 1/9\n");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "output");
        assert_eq!(value["stage"], "DOCKER");
        assert_eq!(value["stream"], "stderr");
        assert_eq!(value["text"], "step 1/9\n");
        assert_eq!(value["run_id"], run_id.to_string());

        let back: LogEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_terminal_event_detection() {
        let run_id = Uuid::new_v4();
        assert!(LogEvent::run_transition(run_id, RunStatus::Failed).is_terminal());
        assert!(!LogEvent::run_transition(run_id, RunStatus::Running).is_terminal());
        assert!(
            !LogEvent::stage_transition(run_id, StageName::Git, StageStatus::Failed, Some(1))
                .is_terminal()
        );
    }
}

//! Live event stream frames
//!
//! The orchestrator serves a run's events as server-sent events. Every frame
//! has an event name and a JSON data payload:
//! - `snapshot`: the run as it is at subscribe time, sent once first
//! - `log`: one `LogEvent`
//! - `lagged`: the observer fell behind and `skipped` events were dropped

use serde::{Deserialize, Serialize};

use crate::domain::log::LogEvent;
use crate::domain::run::PipelineRun;

pub const SNAPSHOT_EVENT: &str = "snapshot";
pub const LOG_EVENT: &str = "log";
pub const LAGGED_EVENT: &str = "lagged";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaggedNotice {
    pub skipped: u64,
}

/// One decoded frame of a run's event stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Snapshot(Box<PipelineRun>),
    Log(LogEvent),
    Lagged(LaggedNotice),
}

impl StreamFrame {
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamFrame::Snapshot(_) => SNAPSHOT_EVENT,
            StreamFrame::Log(_) => LOG_EVENT,
            StreamFrame::Lagged(_) => LAGGED_EVENT,
        }
    }

    /// JSON payload for the frame's `data:` field
    pub fn to_data(&self) -> serde_json::Result<String> {
        match self {
            StreamFrame::Snapshot(run) => serde_json::to_string(run),
            StreamFrame::Log(event) => serde_json::to_string(event),
            StreamFrame::Lagged(notice) => serde_json::to_string(notice),
        }
    }

    /// Decodes a frame from its event name and data payload
    ///
    /// Returns `Ok(None)` for event names this version does not know.
    pub fn decode(event: &str, data: &str) -> serde_json::Result<Option<Self>> {
        let frame = match event {
            SNAPSHOT_EVENT => StreamFrame::Snapshot(Box::new(serde_json::from_str(data)?)),
            LOG_EVENT => StreamFrame::Log(serde_json::from_str(data)?),
            LAGGED_EVENT => StreamFrame::Lagged(serde_json::from_str(data)?),
            _ => return Ok(None),
        };
        Ok(Some(frame))
    }
}

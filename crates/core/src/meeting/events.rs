//! # Meeting Events
//!
//! Progress notifications emitted by the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of meeting event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MeetingEventKind {
    /// An agent call was opened
    TurnStarted,
    /// Decoded text arrived for the in-flight message
    Fragment,
    /// An agent finished speaking
    TurnCompleted,
    /// The call failed; an error message was recorded
    TurnFailed,
    /// The user cancelled the in-flight call
    TurnCancelled,
    /// Waiting on feedback or an advance token
    Parked,
    /// All four stages have spoken
    PipelineCompleted,
    SummaryCompleted,
    SessionCleared,
}

/// An event in the meeting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MeetingEventKind,
    /// Agent id, or `system`
    pub agent: String,
    /// Stage index if the event belongs to one
    #[serde(default)]
    pub stage: Option<usize>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl MeetingEvent {
    pub fn new(kind: MeetingEventKind, agent: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            agent: agent.to_string(),
            stage: None,
            data: None,
        }
    }

    pub fn with_stage(mut self, stage: usize) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

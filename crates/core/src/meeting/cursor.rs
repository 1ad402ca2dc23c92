//! # Pipeline Cursor
//!
//! Turn states of the meeting and the transitions between them.

use serde::{Deserialize, Serialize};

use crate::agents::STAGE_COUNT;

/// Where the meeting currently is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "stage")]
pub enum TurnState {
    /// No round started yet
    #[default]
    Idle,
    /// A call to this stage's agent is in flight
    AwaitingTurn(usize),
    /// Interactive mode: this stage finished, waiting on the user
    ParkedForFeedback(usize),
    /// Every stage has spoken
    Exhausted,
}

impl TurnState {
    /// A new topic may be submitted
    pub fn accepts_submit(&self) -> bool {
        matches!(self, Self::Idle | Self::Exhausted)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::AwaitingTurn(_))
    }

    /// Stage index, while one is active or parked
    pub fn stage(&self) -> Option<usize> {
        match self {
            Self::AwaitingTurn(i) | Self::ParkedForFeedback(i) => Some(*i),
            Self::Idle | Self::Exhausted => None,
        }
    }

    /// State after stage `stage` finishes, successfully or not
    pub fn after_stage(stage: usize, interactive: bool) -> Self {
        if interactive {
            Self::ParkedForFeedback(stage)
        } else {
            Self::next_or_exhausted(stage)
        }
    }

    /// Move past a parked stage. `None` when there is nothing to advance.
    pub fn advance(&self) -> Option<Self> {
        match self {
            Self::ParkedForFeedback(i) => Some(Self::next_or_exhausted(*i)),
            _ => None,
        }
    }

    /// Re-run a parked stage with feedback. `None` when not parked.
    pub fn feedback(&self) -> Option<Self> {
        match self {
            Self::ParkedForFeedback(i) => Some(Self::AwaitingTurn(*i)),
            _ => None,
        }
    }

    fn next_or_exhausted(stage: usize) -> Self {
        if stage + 1 < STAGE_COUNT {
            Self::AwaitingTurn(stage + 1)
        } else {
            Self::Exhausted
        }
    }

    /// Flattened view for consumers
    pub fn cursor(&self, summarizing: bool) -> PipelineCursor {
        PipelineCursor {
            current_agent_index: self.stage(),
            awaiting_user_feedback: matches!(self, Self::ParkedForFeedback(_)),
            is_processing: self.is_in_flight() || summarizing,
        }
    }
}

/// Read-only cursor published to the UI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineCursor {
    /// `None` (JSON `null`) when Idle or Exhausted
    pub current_agent_index: Option<usize>,
    pub awaiting_user_feedback: bool,
    /// True exactly while a network call or stream is outstanding
    pub is_processing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_interactive_runs_to_exhaustion() {
        let mut state = TurnState::AwaitingTurn(0);
        let mut seen = vec![];
        while let TurnState::AwaitingTurn(i) = state {
            seen.push(i);
            state = TurnState::after_stage(i, false);
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(state, TurnState::Exhausted);
        assert!(state.accepts_submit());
    }

    #[test]
    fn test_interactive_parks_then_advances() {
        let parked = TurnState::after_stage(1, true);
        assert_eq!(parked, TurnState::ParkedForFeedback(1));
        assert_eq!(parked.advance(), Some(TurnState::AwaitingTurn(2)));
        assert_eq!(parked.feedback(), Some(TurnState::AwaitingTurn(1)));

        let last = TurnState::ParkedForFeedback(3);
        assert_eq!(last.advance(), Some(TurnState::Exhausted));
    }

    #[test]
    fn test_advance_outside_parked_is_rejected() {
        assert_eq!(TurnState::Idle.advance(), None);
        assert_eq!(TurnState::AwaitingTurn(2).advance(), None);
        assert_eq!(TurnState::Exhausted.feedback(), None);
    }

    #[test]
    fn test_cursor_view() {
        let cursor = TurnState::ParkedForFeedback(2).cursor(false);
        assert_eq!(cursor.current_agent_index, Some(2));
        assert!(cursor.awaiting_user_feedback);
        assert!(!cursor.is_processing);

        let cursor = TurnState::AwaitingTurn(0).cursor(false);
        assert!(cursor.is_processing);

        let cursor = TurnState::Exhausted.cursor(true);
        assert_eq!(cursor.current_agent_index, None);
        assert!(cursor.is_processing);
    }

    #[test]
    fn test_cursor_serializes_camel_case() {
        let json = serde_json::to_value(TurnState::AwaitingTurn(1).cursor(false)).unwrap();
        assert_eq!(json["currentAgentIndex"], 1);
        assert_eq!(json["isProcessing"], true);

        let json = serde_json::to_value(TurnState::Idle.cursor(false)).unwrap();
        assert!(json["currentAgentIndex"].is_null());
        assert_eq!(json["isProcessing"], false);
    }
}

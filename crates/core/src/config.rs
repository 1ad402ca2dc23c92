//! # Meeting Configuration
//!
//! Settings shared by the orchestrator, the direct chat and the agent
//! registry. Serializable so the server can persist and patch it.

use serde::{Deserialize, Serialize};

/// Default inference backend
pub const DEFAULT_API_BASE: &str = "http://localhost:8000";

/// Configuration for a meeting room
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MeetingConfig {
    /// Base URL of the inference backend; agent endpoints hang off it
    pub api_base: String,
    /// Park after every stage and wait for feedback or an advance token
    pub interactive: bool,
    /// Pause between completed stages in non-interactive mode
    pub stage_delay_ms: u64,
    /// Agent whose endpoint produces the meeting summary
    pub summary_agent: String,
    /// Previous-stage messages carried into a direct chat
    pub chained_window: usize,
    /// HTTP connect timeout for agent calls
    pub request_timeout_secs: u64,
}

impl Default for MeetingConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            interactive: false,
            stage_delay_ms: 1000,
            summary_agent: "analyst".to_string(),
            chained_window: 3,
            request_timeout_secs: 30,
        }
    }
}

impl MeetingConfig {
    /// Config pointed at a different backend
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Switch interactive (human-in-the-loop) mode on or off
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn with_stage_delay_ms(mut self, delay: u64) -> Self {
        self.stage_delay_ms = delay;
        self
    }

    pub fn stage_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.stage_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MeetingConfig::default();
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert!(!config.interactive);
        assert_eq!(config.chained_window, 3);
        assert_eq!(config.summary_agent, "analyst");
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: MeetingConfig =
            serde_json::from_str(r#"{"interactive": true, "stage_delay_ms": 0}"#).unwrap();
        assert!(config.interactive);
        assert_eq!(config.stage_delay_ms, 0);
        assert_eq!(config.api_base, DEFAULT_API_BASE);
    }
}

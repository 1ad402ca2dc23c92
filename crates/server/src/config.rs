//! Persisted settings and configuration layering
//!
//! Defaults, then `.roundtable/config.json`, then environment, then CLI flags.

use roundtable_core::state::io;
use roundtable_core::MeetingConfig;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

const CONFIG_FILE: &str = "config.json";

/// Settings saved in the runtime directory and patchable over the API
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, ToSchema)]
pub struct PersistedConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interactive: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chained_window: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl PersistedConfig {
    pub async fn load() -> Self {
        match io::read_runtime_file(CONFIG_FILE).await {
            Ok(Some(content)) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Ignoring unreadable config file");
                Self::default()
            }),
            Ok(None) => Self::default(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read config file");
                Self::default()
            }
        }
    }

    pub async fn save(&self) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        io::write_runtime_file(CONFIG_FILE, &content).await?;
        Ok(())
    }

    pub fn merge(&mut self, other: PersistedConfig) {
        if other.api_base.is_some() {
            self.api_base = other.api_base;
        }
        if other.interactive.is_some() {
            self.interactive = other.interactive;
        }
        if other.stage_delay_ms.is_some() {
            self.stage_delay_ms = other.stage_delay_ms;
        }
        if other.summary_agent.is_some() {
            self.summary_agent = other.summary_agent;
        }
        if other.chained_window.is_some() {
            self.chained_window = other.chained_window;
        }
        if other.request_timeout_secs.is_some() {
            self.request_timeout_secs = other.request_timeout_secs;
        }
    }

    /// Overlay the saved values on `base`
    pub fn apply(&self, mut base: MeetingConfig) -> MeetingConfig {
        if let Some(api_base) = &self.api_base {
            base.api_base = api_base.clone();
        }
        if let Some(interactive) = self.interactive {
            base.interactive = interactive;
        }
        if let Some(delay) = self.stage_delay_ms {
            base.stage_delay_ms = delay;
        }
        if let Some(agent) = &self.summary_agent {
            base.summary_agent = agent.clone();
        }
        if let Some(window) = self.chained_window {
            base.chained_window = window;
        }
        if let Some(timeout) = self.request_timeout_secs {
            base.request_timeout_secs = timeout;
        }
        base
    }
}

/// Overlay environment variables (`ROUNDTABLE_API_BASE`)
pub fn apply_env(mut config: MeetingConfig) -> MeetingConfig {
    if let Ok(api_base) = std::env::var("ROUNDTABLE_API_BASE") {
        if !api_base.trim().is_empty() {
            config.api_base = api_base;
        }
    }
    config
}

/// Defaults, saved file and environment, in that order
pub async fn resolve() -> MeetingConfig {
    let saved = PersistedConfig::load().await;
    apply_env(saved.apply(MeetingConfig::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_unset_fields() {
        let mut saved = PersistedConfig {
            api_base: Some("http://gpu-box:8000".into()),
            stage_delay_ms: Some(500),
            ..Default::default()
        };
        saved.merge(PersistedConfig {
            interactive: Some(true),
            stage_delay_ms: Some(0),
            ..Default::default()
        });

        assert_eq!(saved.api_base.as_deref(), Some("http://gpu-box:8000"));
        assert_eq!(saved.interactive, Some(true));
        assert_eq!(saved.stage_delay_ms, Some(0));
    }

    #[test]
    fn test_apply_over_defaults() {
        let saved = PersistedConfig {
            chained_window: Some(5),
            ..Default::default()
        };
        let config = saved.apply(MeetingConfig::default());
        assert_eq!(config.chained_window, 5);
        assert_eq!(config.stage_delay_ms, 1000);
        assert!(!config.interactive);
    }

    #[test]
    fn test_empty_fields_not_serialized() {
        let json = serde_json::to_string(&PersistedConfig {
            interactive: Some(false),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json, r#"{"interactive":false}"#);
    }
}

//! # Agent Registry
//!
//! Static table of the four pipeline agents and where to reach them.
//!
//! ```text
//! analyst → architect → developer → tester
//! ```

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_API_BASE;
use crate::error::{Error, Result};
use crate::state::Sender;

/// Number of stages in the pipeline
pub const STAGE_COUNT: usize = 4;

/// An agent taking part in the meeting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    /// Stage key
    pub id: String,
    pub display_name: String,
    pub avatar: String,
    /// Streaming endpoint (POST)
    pub endpoint: String,
    /// JSON body key carrying the context string
    pub request_field: String,
    /// JSON key holding the payload in frames and legacy bodies
    pub response_field: String,
    /// Position in the pipeline, 0-based
    pub order: usize,
}

impl Agent {
    /// Placeholder text shown before the first byte arrives
    pub fn thinking_text(&self) -> String {
        format!("{} 正在思考...", self.avatar)
    }
}

/// (id, display name, avatar, path, request field, response field)
const AGENT_TABLE: [(&str, &str, &str, &str, &str, &str); STAGE_COUNT] = [
    ("analyst", "需求分析师", "👨‍💼", "/api/requirementgen/", "topic", "requirement"),
    ("architect", "系统架构师", "👩‍💻", "/api/architecture/", "requirement_text", "architecture"),
    ("developer", "开发工程师", "👨‍🔧", "/api/codegen/", "module_description", "code"),
    ("tester", "测试工程师", "🧪", "/api/test/", "code", "test_code"),
];

/// Lookup table from agent id to [`Agent`]
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    agents: Vec<Agent>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}

impl AgentRegistry {
    /// Build the registry with every endpoint rooted at `api_base`
    pub fn new(api_base: &str) -> Self {
        let base = api_base.trim_end_matches('/');
        let agents = AGENT_TABLE
            .iter()
            .enumerate()
            .map(
                |(order, (id, name, avatar, path, request_field, response_field))| Agent {
                    id: id.to_string(),
                    display_name: name.to_string(),
                    avatar: avatar.to_string(),
                    endpoint: format!("{}{}", base, path),
                    request_field: request_field.to_string(),
                    response_field: response_field.to_string(),
                    order,
                },
            )
            .collect();
        Self { agents }
    }

    /// Find an agent by id.
    ///
    /// Unknown ids fail with [`Error::EndpointUnresolved`]; callers must not
    /// fall back to some other endpoint.
    pub fn lookup(&self, agent_id: &str) -> Result<&Agent> {
        self.agents
            .iter()
            .find(|a| a.id == agent_id)
            .ok_or_else(|| Error::EndpointUnresolved(agent_id.to_string()))
    }

    /// Agent at a pipeline position
    pub fn at(&self, order: usize) -> Option<&Agent> {
        self.agents.get(order)
    }

    /// All agents in pipeline order
    pub fn pipeline(&self) -> &[Agent] {
        &self.agents
    }

    /// The stage immediately before `agent_id`, if any
    pub fn previous(&self, agent_id: &str) -> Result<Option<&Agent>> {
        let agent = self.lookup(agent_id)?;
        Ok(agent.order.checked_sub(1).and_then(|i| self.at(i)))
    }

    /// Human-readable label for a message sender
    pub fn label_for(&self, sender: &Sender) -> String {
        match sender {
            Sender::User => "用户".to_string(),
            Sender::System => "系统".to_string(),
            Sender::Agent(id) => self
                .lookup(id)
                .map(|a| a.display_name.clone())
                .unwrap_or_else(|_| id.clone()),
        }
    }
}

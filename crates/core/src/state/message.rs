//! # Messages
//!
//! Conversation entries and the keys sessions are stored under.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who wrote a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Sender {
    User,
    System,
    /// An agent, by id
    Agent(String),
}

impl Sender {
    pub fn agent(id: impl Into<String>) -> Self {
        Self::Agent(id.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::User => "user",
            Self::System => "system",
            Self::Agent(id) => id,
        }
    }

    pub fn is_agent(&self, agent_id: &str) -> bool {
        matches!(self, Self::Agent(id) if id == agent_id)
    }
}

impl From<String> for Sender {
    fn from(s: String) -> Self {
        match s.as_str() {
            "user" => Self::User,
            "system" => Self::System,
            _ => Self::Agent(s),
        }
    }
}

impl From<Sender> for String {
    fn from(sender: Sender) -> Self {
        match sender {
            Sender::Agent(id) => id,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single conversation entry.
///
/// At most one of `thinking` / `streaming` is set. The orchestrator is the
/// only writer that flips them, through the methods below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Placeholder before the first byte arrives
    #[serde(default)]
    pub thinking: bool,
    /// Text is still being appended
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub is_error: bool,
    /// Imported from the previous stage; never persisted
    #[serde(default)]
    pub from_previous_stage: bool,
    /// System turn-control prompt
    #[serde(default)]
    pub is_prompt: bool,
    /// The meeting summary
    #[serde(default)]
    pub is_summary: bool,
    #[serde(default)]
    pub is_export_options: bool,
}

impl Message {
    /// A finished message
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            sender,
            text: text.into(),
            timestamp: Utc::now(),
            thinking: false,
            streaming: false,
            is_error: false,
            from_previous_stage: false,
            is_prompt: false,
            is_summary: false,
            is_export_options: false,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Sender::System, text)
    }

    /// Placeholder shown while waiting for the first byte
    pub fn thinking(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            thinking: true,
            ..Self::new(sender, text)
        }
    }

    pub fn error(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::new(sender, text)
        }
    }

    /// System message asking the user to steer the next turn
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            is_prompt: true,
            ..Self::system(text)
        }
    }

    pub fn export_options(text: impl Into<String>) -> Self {
        Self {
            is_export_options: true,
            ..Self::system(text)
        }
    }

    /// Mark as imported context
    pub fn imported(mut self) -> Self {
        self.from_previous_stage = true;
        self
    }

    /// Append a fragment, switching a thinking placeholder to streaming.
    ///
    /// The placeholder text is dropped when the first fragment arrives.
    pub fn push_fragment(&mut self, fragment: &str) {
        if self.thinking {
            self.thinking = false;
            self.streaming = true;
            self.text.clear();
        }
        self.text.push_str(fragment);
    }

    /// Freeze the message. A placeholder that never received a byte ends empty.
    pub fn finish(&mut self) {
        if self.thinking {
            self.text.clear();
        }
        self.thinking = false;
        self.streaming = false;
    }

    /// Still waiting on the network
    pub fn is_in_flight(&self) -> bool {
        self.thinking || self.streaming
    }

    /// Turn-control or export chrome rather than conversation content
    pub fn is_control(&self) -> bool {
        self.is_prompt || self.is_export_options
    }
}

/// Key a session is stored under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionKey {
    /// The pipeline meeting
    Meeting,
    /// One-on-one chat with an agent
    Chat(String),
}

impl SessionKey {
    pub fn chat(agent_id: impl Into<String>) -> Self {
        Self::Chat(agent_id.into())
    }

    pub fn as_key(&self) -> String {
        match self {
            Self::Meeting => "meeting_history".to_string(),
            Self::Chat(agent) => format!("chat_history:{}", agent),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_key())
    }
}

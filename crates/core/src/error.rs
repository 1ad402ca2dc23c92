//! # Errors
//!
//! Failure taxonomy for the meeting room core.

use thiserror::Error;

/// Errors raised by the core.
///
/// Only `EndpointUnresolved` and the infrastructure variants are fatal to an
/// operation. `Transport` is recovered by the orchestrator, which records an
/// error message in the session and moves on.
#[derive(Debug, Error)]
pub enum Error {
    /// No agent is registered under this id
    #[error("no agent registered for id '{0}'")]
    EndpointUnresolved(String),

    /// Network, HTTP status, or stream failure while talking to an agent
    #[error("agent '{agent}' transport failure: {message}")]
    Transport { agent: String, message: String },

    /// Nothing in the session can be exported
    #[error("nothing to export: no summary or agent output in this session")]
    EmptyExportTarget,

    /// A turn is already in flight
    #[error("a turn is already in progress")]
    Busy,

    /// The in-flight turn was cancelled
    #[error("turn cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Build a transport failure for `agent`
    pub fn transport(agent: &str, message: impl std::fmt::Display) -> Self {
        Self::Transport {
            agent: agent.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether the orchestrator recovers from this error locally
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_is_recoverable() {
        let err = Error::transport("architect", "connection refused");
        assert!(err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "agent 'architect' transport failure: connection refused"
        );
    }

    #[test]
    fn test_unresolved_is_fatal() {
        let err = Error::EndpointUnresolved("designer".to_string());
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("designer"));
    }
}

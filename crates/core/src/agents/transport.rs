//! # Agent Transport
//!
//! Opens a response stream for one agent call. The body is handed back as
//! raw byte chunks; turning them into text is the decoder's job.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::time::Duration;

use super::registry::Agent;
use crate::config::MeetingConfig;
use crate::error::{Error, Result};

/// Raw response body of an agent call
pub type ChunkStream = BoxStream<'static, Result<Bytes>>;

/// Something that can send a context string to an agent and stream back the reply
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// POST `context` to the agent's endpoint and return its body stream.
    ///
    /// Connection failures and non-success statuses are reported as
    /// [`Error::Transport`] before any chunk is yielded.
    async fn open(&self, agent: &Agent, context: &str) -> Result<ChunkStream>;
}

/// reqwest-backed transport talking to the inference backend
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &MeetingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent("roundtable/0.1")
            .build()
            .map_err(|e| Error::Other(anyhow::anyhow!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

/// Request body: the context under the agent's field, streaming requested
fn request_body(agent: &Agent, context: &str) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    body.insert(
        agent.request_field.clone(),
        serde_json::Value::String(context.to_string()),
    );
    body.insert("stream".to_string(), serde_json::Value::Bool(true));
    serde_json::Value::Object(body)
}

/// Payload of a non-streaming JSON reply
fn legacy_payload(agent: &Agent, body: &serde_json::Value) -> String {
    [agent.response_field.as_str(), "content"]
        .iter()
        .find_map(|key| body.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_default()
}

#[async_trait]
impl AgentTransport for HttpTransport {
    #[tracing::instrument(skip(self, context), fields(agent = %agent.id, context_len = context.len()))]
    async fn open(&self, agent: &Agent, context: &str) -> Result<ChunkStream> {
        let response = self
            .client
            .post(&agent.endpoint)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request_body(agent, context))
            .send()
            .await
            .map_err(|e| Error::transport(&agent.id, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, "Agent endpoint returned error status");
            return Err(Error::transport(
                &agent.id,
                format!("HTTP {}: {}", status, body.trim()),
            ));
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/json"))
            .unwrap_or(false);

        if is_json {
            // Backend ignored `stream: true` and answered in one piece
            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|e| Error::transport(&agent.id, e))?;
            let payload = legacy_payload(agent, &body);
            tracing::debug!(len = payload.len(), "Non-streaming reply");
            return Ok(stream::once(async move { Ok(Bytes::from(payload)) }).boxed());
        }

        let agent_id = agent.id.clone();
        Ok(response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| Error::transport(&agent_id, e)))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentRegistry;

    #[test]
    fn test_request_body_uses_agent_field() {
        let registry = AgentRegistry::default();
        let developer = registry.lookup("developer").unwrap();
        let body = request_body(developer, "模块：登录");
        assert_eq!(body["module_description"], "模块：登录");
        assert_eq!(body["stream"], true);
        assert!(body.get("topic").is_none());
    }

    #[test]
    fn test_legacy_payload_prefers_response_field() {
        let registry = AgentRegistry::default();
        let tester = registry.lookup("tester").unwrap();

        let body = serde_json::json!({ "test_code": "def test_x(): pass", "content": "other" });
        assert_eq!(legacy_payload(tester, &body), "def test_x(): pass");

        let body = serde_json::json!({ "content": "fallback" });
        assert_eq!(legacy_payload(tester, &body), "fallback");

        let body = serde_json::json!({ "unrelated": 1 });
        assert_eq!(legacy_payload(tester, &body), "");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let config = MeetingConfig::default();
        let transport = HttpTransport::new(&config).unwrap();
        // Port 9 (discard) on localhost is not expected to accept HTTP
        let registry = AgentRegistry::new("http://127.0.0.1:9");
        let analyst = registry.lookup("analyst").unwrap();

        let err = transport.open(analyst, "topic").await.err().unwrap();
        assert!(err.is_recoverable());
    }
}

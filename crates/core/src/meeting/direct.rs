//! # Direct Chat
//!
//! One-on-one conversation with a single agent. Each agent keeps its own
//! session; the previous stage's last few turns are shown on open and
//! quoted into every request (chained context).

use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use super::context::{chained_header, ContextBuilder};
use super::events::{MeetingEvent, MeetingEventKind};
use super::orchestrator::ERROR_TEXT;
use crate::agents::{Agent, AgentRegistry, AgentTransport};
use crate::config::MeetingConfig;
use crate::error::{Error, Result};
use crate::state::{ConversationStore, Message, Sender, SessionKey};
use crate::stream::{Fragment, StreamDecoder};

pub struct DirectChat {
    registry: AgentRegistry,
    transport: Arc<dyn AgentTransport>,
    store: Arc<dyn ConversationStore>,
    config: MeetingConfig,
    event_tx: Option<mpsc::Sender<MeetingEvent>>,
    /// One lock per agent session; a send holds it from load to save
    session_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl DirectChat {
    pub fn new(
        registry: AgentRegistry,
        transport: Arc<dyn AgentTransport>,
        store: Arc<dyn ConversationStore>,
        config: MeetingConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            store,
            config,
            event_tx: None,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the configuration used by subsequent sends
    pub fn set_config(&mut self, config: MeetingConfig) {
        if config.api_base != self.config.api_base {
            self.registry = AgentRegistry::new(&config.api_base);
        }
        self.config = config;
    }

    /// Set event channel for streamed fragments
    pub fn with_event_channel(mut self, tx: mpsc::Sender<MeetingEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// The view shown when a chat opens: imported previous-stage turns under
    /// a header, then the agent's own session
    pub fn open(&self, agent_id: &str) -> Result<Vec<Message>> {
        self.registry.lookup(agent_id)?;
        let mut view = Vec::new();

        if let Some(previous) = self.registry.previous(agent_id)? {
            let earlier: Vec<Message> = self
                .store
                .load(&SessionKey::chat(&previous.id))?
                .into_iter()
                .filter(|m| !m.from_previous_stage && !m.is_in_flight())
                .collect();

            if !earlier.is_empty() {
                let skip = earlier.len().saturating_sub(self.config.chained_window);
                view.push(Message::system(chained_header(&previous.display_name)).imported());
                view.extend(earlier.into_iter().skip(skip).map(Message::imported));
            }
        }

        view.extend(self.store.load(&SessionKey::chat(agent_id))?);
        Ok(view)
    }

    /// Send `input` to the agent and return its updated session.
    ///
    /// Transport failures are recorded as an error reply, like the meeting does.
    #[tracing::instrument(skip(self, input), fields(input_len = input.len()))]
    pub async fn send(&self, agent_id: &str, input: &str) -> Result<Vec<Message>> {
        let agent = self.registry.lookup(agent_id)?.clone();
        let lock = self.session_lock(&agent.id)?;
        let _session = lock.lock().await;

        let previous_session = match self.registry.previous(agent_id)? {
            Some(previous) => self.store.load(&SessionKey::chat(&previous.id))?,
            None => Vec::new(),
        };
        let context = ContextBuilder::new(&self.registry).chained(
            agent_id,
            &previous_session,
            input,
            self.config.chained_window,
        )?;

        let key = SessionKey::chat(agent_id);
        let mut session: Vec<Message> = self
            .store
            .load(&key)?
            .into_iter()
            .filter(|m| !m.from_previous_stage)
            .collect();
        session.push(Message::user(input));

        let sender = Sender::agent(&agent.id);
        match self.collect_reply(&agent, &context).await {
            Ok(text) => {
                tracing::info!(agent = %agent.id, reply_len = text.len(), "Direct reply received");
                session.push(Message::new(sender, text));
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!(agent = %agent.id, error = %e, "Direct chat call failed");
                session.push(Message::error(sender, ERROR_TEXT));
            }
            Err(e) => return Err(e),
        }

        self.store.save(&key, &session)?;
        Ok(session)
    }

    /// Forget one agent's session; the others are untouched
    pub async fn clear(&self, agent_id: &str) -> Result<()> {
        let agent = self.registry.lookup(agent_id)?;
        let lock = self.session_lock(&agent.id)?;
        let _session = lock.lock().await;
        self.store.clear(&SessionKey::chat(&agent.id))
    }

    fn session_lock(&self, agent_id: &str) -> Result<Arc<AsyncMutex<()>>> {
        let mut locks = self
            .session_locks
            .lock()
            .map_err(|e| Error::Other(anyhow::anyhow!("Lock error: {}", e)))?;
        Ok(locks.entry(agent_id.to_string()).or_default().clone())
    }

    async fn collect_reply(&self, agent: &Agent, context: &str) -> Result<String> {
        let mut body = self.transport.open(agent, context).await?;
        let mut decoder = StreamDecoder::new(agent.response_field.as_str());
        let mut reply = String::new();

        while let Some(chunk) = body.next().await {
            let fragments = decoder.decode(&chunk?);
            self.absorb(agent, fragments, &mut reply).await?;
        }
        tracing::debug!(agent = %agent.id, event_stream = decoder.is_event_stream(), "Direct reply stream ended");
        let rest = decoder.finish();
        self.absorb(agent, rest, &mut reply).await?;

        Ok(reply)
    }

    async fn absorb(&self, agent: &Agent, fragments: Vec<Fragment>, reply: &mut String) -> Result<()> {
        for fragment in fragments {
            match fragment {
                Fragment::Text(text) => {
                    reply.push_str(&text);
                    if let Some(tx) = &self.event_tx {
                        let event = MeetingEvent::new(MeetingEventKind::Fragment, &agent.id)
                            .with_data(serde_json::json!({ "text": text, "direct": true }));
                        let _ = tx.send(event).await;
                    }
                }
                Fragment::Error(message) => return Err(Error::transport(&agent.id, message)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meeting::orchestrator::tests::{Reply, ScriptedTransport};
    use crate::state::MemoryConversationStore;

    fn chat() -> (DirectChat, Arc<ScriptedTransport>, Arc<MemoryConversationStore>) {
        let transport = Arc::new(ScriptedTransport::default());
        let store = Arc::new(MemoryConversationStore::new());
        let chat = DirectChat::new(
            AgentRegistry::default(),
            transport.clone(),
            store.clone(),
            MeetingConfig::default(),
        );
        (chat, transport, store)
    }

    #[tokio::test]
    async fn test_first_stage_has_no_imports() {
        let (chat, transport, _) = chat();
        let session = chat.send("analyst", "在线考试系统").await.unwrap();

        assert_eq!(session.len(), 2);
        assert_eq!(session[1].text, "analyst reply");
        assert_eq!(transport.calls_to("analyst"), vec!["在线考试系统".to_string()]);
        assert!(chat.open("analyst").unwrap().iter().all(|m| !m.from_previous_stage));
    }

    #[tokio::test]
    async fn test_send_quotes_previous_stage() {
        let (chat, transport, _) = chat();
        chat.send("analyst", "q1").await.unwrap();
        chat.send("analyst", "q2").await.unwrap();

        transport.script("architect", Reply::frames(&["微服务"]));
        let session = chat.send("architect", "给出架构").await.unwrap();
        assert_eq!(session.last().unwrap().text, "微服务");

        let context = &transport.calls_to("architect")[0];
        assert!(context.starts_with("# 上一个角色 (需求分析师) 对话摘要："));
        assert!(context.contains("需求分析师：analyst reply\n\n用户：q2\n\n需求分析师：analyst reply"));
        assert!(!context.contains("q1"));
        assert!(context.ends_with("当前输入：给出架构"));
    }

    #[tokio::test]
    async fn test_open_imports_without_persisting_them() {
        let (chat, _, store) = chat();
        chat.send("developer", "写登录模块").await.unwrap();
        chat.send("tester", "写测试").await.unwrap();

        let view = chat.open("tester").unwrap();
        assert!(view[0].from_previous_stage);
        assert_eq!(view[0].sender, Sender::System);
        assert_eq!(view.iter().filter(|m| m.from_previous_stage).count(), 3);
        assert_eq!(view.iter().filter(|m| !m.from_previous_stage).count(), 2);

        let stored = store.load(&SessionKey::chat("tester")).unwrap();
        assert!(stored.iter().all(|m| !m.from_previous_stage));
    }

    #[tokio::test]
    async fn test_failure_recorded_as_error_reply() {
        let (chat, transport, _) = chat();
        transport.script("developer", Reply::Fail("502".into()));

        let session = chat.send("developer", "x").await.unwrap();
        assert!(session.last().unwrap().is_error);
    }

    #[tokio::test]
    async fn test_clear_is_per_agent() {
        let (chat, _, store) = chat();
        chat.send("analyst", "a").await.unwrap();
        chat.send("architect", "b").await.unwrap();

        chat.clear("analyst").await.unwrap();
        assert!(store.load(&SessionKey::chat("analyst")).unwrap().is_empty());
        assert_eq!(store.load(&SessionKey::chat("architect")).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_sends_keep_both_exchanges() {
        let (chat, transport, store) = chat();
        transport.script("architect", Reply::yielding("分层"));
        transport.script("architect", Reply::yielding("微服务"));

        let (first, second) = tokio::join!(
            chat.send("architect", "方案一"),
            chat.send("architect", "方案二")
        );
        first.unwrap();
        second.unwrap();

        let stored = store.load(&SessionKey::chat("architect")).unwrap();
        let texts: Vec<&str> = stored.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["方案一", "分层", "方案二", "微服务"]);
    }

    #[tokio::test]
    async fn test_unknown_agent_is_unresolved() {
        let (chat, transport, _) = chat();
        let err = chat.send("designer", "x").await.unwrap_err();
        assert!(matches!(err, Error::EndpointUnresolved(_)));
        assert!(transport.call_order().is_empty());
    }
}

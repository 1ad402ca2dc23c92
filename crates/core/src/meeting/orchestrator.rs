//! # Turn Orchestrator
//!
//! Drives the meeting through its four stages, one agent call at a time.
//!
//! ```text
//! Idle ──submit──▶ AwaitingTurn(0) ──▶ … ──▶ AwaitingTurn(3) ──▶ Exhausted
//!                        │ (interactive)
//!                        ▼
//!               ParkedForFeedback(i) ──next──▶ AwaitingTurn(i+1)
//!                        └───feedback──▶ AwaitingTurn(i)
//! ```
//!
//! The orchestrator is the only writer of the meeting session. Consumers
//! read snapshots from [`TurnOrchestrator::subscribe`] and may stop an
//! in-flight call through a [`Canceller`].

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::context::ContextBuilder;
use super::control::TurnInput;
use super::cursor::{PipelineCursor, TurnState};
use super::events::{MeetingEvent, MeetingEventKind};
use crate::agents::{Agent, AgentRegistry, AgentTransport};
use crate::config::MeetingConfig;
use crate::error::{Error, Result};
use crate::state::{ConversationStore, Message, Sender, SessionKey};
use crate::stream::{Fragment, StreamDecoder};

/// Shown in place of a reply that failed
pub const ERROR_TEXT: &str = "⚠️ 抱歉，我在处理时遇到了问题。";

const PIPELINE_DONE_TEXT: &str = "所有角色均已发言，会议流程结束。可以请求生成会议总结。";
const EXPORT_OPTIONS_TEXT: &str = "会议总结已生成，可以导出为文本文档或 Markdown 文档。";

/// Messages a summary needs before it is worth asking for
const SUMMARY_MIN_MESSAGES: usize = 3;

/// Read-only view of the meeting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingSnapshot {
    pub messages: Vec<Message>,
    pub cursor: PipelineCursor,
}

/// What a call into the orchestrator ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Work ran; the meeting is now in this state
    Ran(TurnState),
    /// Nothing to do for this input in the current state
    Ignored,
    /// The call was cancelled and the previous state restored
    Cancelled,
}

/// Handle for cancelling whatever the orchestrator is doing
#[derive(Debug, Clone, Default)]
pub struct Canceller {
    token: Arc<Mutex<Option<CancellationToken>>>,
}

impl Canceller {
    /// Cancel the in-flight operation. Returns `false` if nothing was running.
    pub fn cancel(&self) -> bool {
        match self.token.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(e) => {
                tracing::warn!("Canceller lock poisoned: {}", e);
                false
            }
        }
    }

    fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut guard) = self.token.lock() {
            *guard = Some(token.clone());
        }
        token
    }

    /// Token of the operation in flight, if any
    fn current(&self) -> Option<CancellationToken> {
        self.token.lock().ok().and_then(|guard| guard.clone())
    }

    fn disarm(&self) {
        if let Ok(mut guard) = self.token.lock() {
            *guard = None;
        }
    }
}

/// The meeting state machine
pub struct TurnOrchestrator {
    registry: AgentRegistry,
    transport: Arc<dyn AgentTransport>,
    store: Arc<dyn ConversationStore>,
    config: MeetingConfig,
    messages: Vec<Message>,
    state: TurnState,
    summarizing: bool,
    event_tx: Option<mpsc::Sender<MeetingEvent>>,
    snapshot_tx: watch::Sender<MeetingSnapshot>,
    canceller: Canceller,
}

impl TurnOrchestrator {
    /// Create an orchestrator, restoring the persisted meeting session
    pub fn new(
        registry: AgentRegistry,
        transport: Arc<dyn AgentTransport>,
        store: Arc<dyn ConversationStore>,
        config: MeetingConfig,
    ) -> Result<Self> {
        let messages = store.load(&SessionKey::Meeting)?;
        let (snapshot_tx, _) = watch::channel(MeetingSnapshot {
            messages: messages.clone(),
            cursor: PipelineCursor::default(),
        });

        tracing::debug!(restored = messages.len(), "Meeting session loaded");

        Ok(Self {
            registry,
            transport,
            store,
            config,
            messages,
            state: TurnState::Idle,
            summarizing: false,
            event_tx: None,
            snapshot_tx,
            canceller: Canceller::default(),
        })
    }

    /// Set event channel for streaming events
    pub fn with_event_channel(mut self, tx: mpsc::Sender<MeetingEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<MeetingSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn cursor(&self) -> PipelineCursor {
        self.state.cursor(self.summarizing)
    }

    pub fn snapshot(&self) -> MeetingSnapshot {
        MeetingSnapshot {
            messages: self.messages.clone(),
            cursor: self.cursor(),
        }
    }

    pub fn config(&self) -> &MeetingConfig {
        &self.config
    }

    /// Replace the configuration used by subsequent turns
    pub fn set_config(&mut self, config: MeetingConfig) {
        if config.api_base != self.config.api_base {
            self.registry = AgentRegistry::new(&config.api_base);
        }
        self.config = config;
    }

    fn is_busy(&self) -> bool {
        self.state.is_in_flight() || self.summarizing
    }

    /// Handle one line of user input.
    ///
    /// From `Idle` or `Exhausted` the input is a new topic. While parked it is
    /// either an advance token or feedback for the parked stage.
    #[tracing::instrument(skip(self, input), fields(state = ?self.state))]
    pub async fn handle_send(&mut self, input: &str) -> Result<SendOutcome> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(SendOutcome::Ignored);
        }
        if self.is_busy() {
            return Err(Error::Busy);
        }

        let parsed = TurnInput::parse(input);
        match (self.state, parsed) {
            (TurnState::ParkedForFeedback(stage), TurnInput::Advance) => self.advance(stage).await,
            (TurnState::ParkedForFeedback(stage), TurnInput::Feedback(text)) => {
                self.feedback(stage, text).await
            }
            (_, TurnInput::Advance) => {
                tracing::info!("Advance requested with no parked stage, ignoring");
                Ok(SendOutcome::Ignored)
            }
            (state, TurnInput::Feedback(topic)) if state.accepts_submit() => {
                self.submit(topic).await
            }
            (_, TurnInput::Feedback(_)) => Err(Error::Busy),
        }
    }

    async fn submit(&mut self, topic: String) -> Result<SendOutcome> {
        tracing::info!(topic_len = topic.len(), "Meeting round started");
        let before = self.state;
        self.messages.push(Message::user(topic));
        self.persist()?;
        self.run_from(0, before).await
    }

    async fn advance(&mut self, stage: usize) -> Result<SendOutcome> {
        match TurnState::ParkedForFeedback(stage).advance() {
            Some(TurnState::AwaitingTurn(next)) => {
                tracing::info!(from = stage, to = next, "Advancing to next stage");
                self.run_from(next, TurnState::ParkedForFeedback(stage)).await
            }
            Some(_) => {
                self.finish_pipeline().await?;
                Ok(SendOutcome::Ran(self.state))
            }
            None => Ok(SendOutcome::Ignored),
        }
    }

    async fn feedback(&mut self, stage: usize, text: String) -> Result<SendOutcome> {
        let parked = TurnState::ParkedForFeedback(stage);
        let Some(TurnState::AwaitingTurn(rerun)) = parked.feedback() else {
            return Ok(SendOutcome::Ignored);
        };
        tracing::info!(stage = rerun, "Feedback for parked stage");
        self.messages.push(Message::user(text));
        self.persist()?;
        self.run_from(rerun, parked).await
    }

    /// Run stages from `start` until parked, exhausted, cancelled or failed.
    ///
    /// On cancellation or a fatal error the cursor goes back to `restore`.
    async fn run_from(&mut self, start: usize, restore: TurnState) -> Result<SendOutcome> {
        let token = self.canceller.arm();
        let outcome = self.run_stages(start, restore, &token).await;
        self.canceller.disarm();
        outcome
    }

    async fn run_stages(
        &mut self,
        start: usize,
        restore: TurnState,
        token: &CancellationToken,
    ) -> Result<SendOutcome> {
        let mut stage = start;

        loop {
            self.state = TurnState::AwaitingTurn(stage);
            self.publish();

            let succeeded = match self.run_turn(stage, token).await {
                Ok(succeeded) => succeeded,
                Err(Error::Cancelled) => return Ok(self.restore_after_cancel(restore, stage).await),
                Err(e) => {
                    self.state = restore;
                    self.publish();
                    return Err(e);
                }
            };

            match TurnState::after_stage(stage, self.config.interactive) {
                TurnState::AwaitingTurn(next) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            return Ok(self.restore_after_cancel(restore, next).await);
                        }
                        _ = tokio::time::sleep(self.config.stage_delay()) => {}
                    }
                    stage = next;
                }
                TurnState::ParkedForFeedback(parked) => {
                    self.park(parked, succeeded).await?;
                    return Ok(SendOutcome::Ran(self.state));
                }
                _ => {
                    self.finish_pipeline().await?;
                    return Ok(SendOutcome::Ran(self.state));
                }
            }
        }
    }

    async fn restore_after_cancel(&mut self, restore: TurnState, stage: usize) -> SendOutcome {
        tracing::info!(stage, restored = ?restore, "Turn cancelled");
        self.state = restore;
        self.publish();
        self.emit(MeetingEvent::new(MeetingEventKind::TurnCancelled, "system").with_stage(stage))
            .await;
        SendOutcome::Cancelled
    }

    async fn park(&mut self, stage: usize, succeeded: bool) -> Result<()> {
        let name = self
            .registry
            .at(stage)
            .map(|a| a.display_name.clone())
            .unwrap_or_default();
        let has_next = TurnState::ParkedForFeedback(stage)
            .advance()
            .map(|s| s.is_in_flight())
            .unwrap_or(false);

        let text = match (succeeded, has_next) {
            (true, true) => format!("{} 已完成发言。请输入反馈意见，或输入“下一位”请下一位角色发言。", name),
            (true, false) => format!("{} 已完成发言。请输入反馈意见，或输入“下一位”结束会议流程。", name),
            (false, _) => format!("{} 处理失败。可以输入反馈重试，或输入“下一位”跳过。", name),
        };

        self.messages.push(Message::prompt(text));
        self.state = TurnState::ParkedForFeedback(stage);
        self.persist()?;
        self.publish();
        self.emit(MeetingEvent::new(MeetingEventKind::Parked, "system").with_stage(stage))
            .await;
        Ok(())
    }

    async fn finish_pipeline(&mut self) -> Result<()> {
        self.messages.push(Message::prompt(PIPELINE_DONE_TEXT));
        self.state = TurnState::Exhausted;
        self.persist()?;
        self.publish();
        tracing::info!("All stages completed");
        self.emit(MeetingEvent::new(MeetingEventKind::PipelineCompleted, "system"))
            .await;
        Ok(())
    }

    /// One agent call with cumulative context.
    ///
    /// Returns whether the agent produced a reply. Transport failures are
    /// recorded as an error message and reported as `Ok(false)`.
    #[tracing::instrument(skip(self, token))]
    async fn run_turn(&mut self, stage: usize, token: &CancellationToken) -> Result<bool> {
        let agent = self
            .registry
            .at(stage)
            .cloned()
            .ok_or_else(|| Error::EndpointUnresolved(format!("stage {}", stage)))?;

        let context = ContextBuilder::new(&self.registry).cumulative(&self.messages);
        let sender = Sender::agent(&agent.id);

        tracing::info!(agent = %agent.id, context_len = context.len(), "Turn started");
        self.emit(
            MeetingEvent::new(MeetingEventKind::TurnStarted, &agent.id)
                .with_stage(stage)
                .with_data(serde_json::json!({ "context_len": context.len() })),
        )
        .await;

        self.messages
            .push(Message::thinking(sender.clone(), agent.thinking_text()));
        self.publish();

        match self.stream_reply(&agent, &context, token).await {
            Ok(()) => {
                self.settle_last();
                self.persist()?;
                self.publish();
                tracing::info!(agent = %agent.id, "Turn completed");
                self.emit(MeetingEvent::new(MeetingEventKind::TurnCompleted, &agent.id).with_stage(stage))
                    .await;
                Ok(true)
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!(agent = %agent.id, error = %e, "Turn failed");
                self.messages.pop();
                self.messages.push(Message::error(sender, ERROR_TEXT));
                self.persist()?;
                self.publish();
                self.emit(
                    MeetingEvent::new(MeetingEventKind::TurnFailed, &agent.id)
                        .with_stage(stage)
                        .with_data(serde_json::json!({ "error": e.to_string() })),
                )
                .await;
                Ok(false)
            }
            Err(e) => {
                self.messages.pop();
                self.publish();
                Err(e)
            }
        }
    }

    /// Stream an agent reply into the last message
    async fn stream_reply(
        &mut self,
        agent: &Agent,
        context: &str,
        token: &CancellationToken,
    ) -> Result<()> {
        let mut body = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Cancelled),
            opened = self.transport.open(agent, context) => opened?,
        };

        let mut decoder = StreamDecoder::new(agent.response_field.as_str());
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Cancelled),
                next = body.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    for fragment in decoder.decode(&chunk) {
                        self.apply_fragment(agent, fragment).await?;
                    }
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        tracing::debug!(agent = %agent.id, event_stream = decoder.is_event_stream(), "Reply stream ended");
        for fragment in decoder.finish() {
            self.apply_fragment(agent, fragment).await?;
        }
        Ok(())
    }

    async fn apply_fragment(&mut self, agent: &Agent, fragment: Fragment) -> Result<()> {
        match fragment {
            Fragment::Text(text) => {
                if let Some(last) = self.messages.last_mut() {
                    last.push_fragment(&text);
                }
                self.publish();
                self.emit(
                    MeetingEvent::new(MeetingEventKind::Fragment, &agent.id)
                        .with_data(serde_json::json!({ "text": text })),
                )
                .await;
                Ok(())
            }
            Fragment::Error(message) => Err(Error::transport(&agent.id, message)),
        }
    }

    fn settle_last(&mut self) {
        if let Some(last) = self.messages.last_mut() {
            last.finish();
        }
    }

    /// Ask the summary agent to condense the whole meeting.
    ///
    /// Needs at least three messages and no call in flight; otherwise nothing
    /// is sent.
    #[tracing::instrument(skip(self))]
    pub async fn summarize(&mut self) -> Result<SendOutcome> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        if self.messages.len() < SUMMARY_MIN_MESSAGES {
            tracing::info!(count = self.messages.len(), "Too few messages to summarize");
            return Ok(SendOutcome::Ignored);
        }

        let agent = self.registry.lookup(&self.config.summary_agent)?.clone();
        let context = ContextBuilder::new(&self.registry).summary(&self.messages);

        self.summarizing = true;
        let mut placeholder = Message::thinking(Sender::System, agent.thinking_text());
        placeholder.is_summary = true;
        self.messages.push(placeholder);
        self.publish();

        let token = self.canceller.arm();
        let result = self.stream_reply(&agent, &context, &token).await;
        self.canceller.disarm();
        self.summarizing = false;

        match result {
            Ok(()) => {
                self.settle_last();
                self.messages.push(Message::export_options(EXPORT_OPTIONS_TEXT));
                self.persist()?;
                self.publish();
                tracing::info!(agent = %agent.id, "Summary completed");
                self.emit(MeetingEvent::new(MeetingEventKind::SummaryCompleted, &agent.id))
                    .await;
                Ok(SendOutcome::Ran(self.state))
            }
            Err(Error::Cancelled) => {
                self.messages.pop();
                self.publish();
                self.emit(MeetingEvent::new(MeetingEventKind::TurnCancelled, &agent.id))
                    .await;
                Ok(SendOutcome::Cancelled)
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!(agent = %agent.id, error = %e, "Summary failed");
                self.messages.pop();
                self.messages.push(Message::error(Sender::System, ERROR_TEXT));
                self.persist()?;
                self.publish();
                self.emit(
                    MeetingEvent::new(MeetingEventKind::TurnFailed, &agent.id)
                        .with_data(serde_json::json!({ "error": e.to_string(), "summary": true })),
                )
                .await;
                Ok(SendOutcome::Ran(self.state))
            }
            Err(e) => {
                self.messages.pop();
                self.publish();
                Err(e)
            }
        }
    }

    /// Forget the meeting and return to `Idle`
    pub async fn clear(&mut self) -> Result<()> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        self.store.clear(&SessionKey::Meeting)?;
        self.messages.clear();
        self.state = TurnState::Idle;
        self.publish();
        tracing::info!("Meeting session cleared");
        self.emit(MeetingEvent::new(MeetingEventKind::SessionCleared, "system"))
            .await;
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let settled: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| !m.is_in_flight() && !m.from_previous_stage)
            .cloned()
            .collect();
        self.store.save(&SessionKey::Meeting, &settled)
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    /// Deliver an event. A full channel only holds up the turn until it is
    /// cancelled; after that the event is dropped.
    async fn emit(&self, event: MeetingEvent) {
        let Some(tx) = &self.event_tx else {
            return;
        };
        let event = match tx.try_send(event) {
            Err(TrySendError::Full(event)) => event,
            _ => return,
        };

        match self.canceller.current() {
            Some(token) => {
                let kind = event.kind.clone();
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        tracing::debug!(?kind, "Event consumer stalled, event dropped");
                    }
                    _ = tx.send(event) => {}
                }
            }
            None => {
                let _ = tx.send(event).await;
            }
        }
    }
}

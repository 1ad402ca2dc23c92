//! # Roundtable Core
//!
//! Turn-taking meeting room for a fixed pipeline of AI agents: requirement
//! analyst, architect, developer and tester speak in order about one topic,
//! each reply streamed from a remote inference service.
//!
//! ## Architecture
//!
//! - `agents/` - Agent table and the HTTP transport that calls them
//! - `stream/` - Incremental decoder for event-stream and raw-text replies
//! - `meeting/` - Orchestrator state machine, context building, direct chat
//! - `state/` - Messages, SQLite-backed conversation store, runtime dir IO
//! - `export/` - Plain text and Markdown meeting records
//!
//! ## Usage
//!
//! ```rust,ignore
//! use roundtable_core::{AgentRegistry, HttpTransport, MeetingConfig, TurnOrchestrator};
//!
//! let config = MeetingConfig::default();
//! let transport = Arc::new(HttpTransport::new(&config)?);
//! let store = Arc::new(SqliteConversationStore::new(&RoundtableDb::open()?));
//! let mut meeting = TurnOrchestrator::new(AgentRegistry::new(&config.api_base), transport, store, config)?;
//! meeting.handle_send("Build a library management system").await?;
//! ```

pub mod agents;
pub mod config;
pub mod error;
pub mod export;
pub mod meeting;
pub mod state;
pub mod stream;

pub use agents::{Agent, AgentRegistry, AgentTransport, HttpTransport};
pub use config::MeetingConfig;
pub use error::{Error, Result};
pub use export::{ExportDocument, ExportFormat, ExportProjector};
pub use meeting::{DirectChat, MeetingEvent, MeetingSnapshot, SendOutcome, TurnOrchestrator, TurnState};
pub use state::{ConversationStore, Message, RoundtableDb, SqliteConversationStore};

//! # Meeting
//!
//! The turn-taking pipeline and one-on-one chat built on top of it.

pub mod context;
pub mod control;
pub mod cursor;
pub mod direct;
pub mod events;
pub mod orchestrator;

pub use context::ContextBuilder;
pub use control::TurnInput;
pub use cursor::{PipelineCursor, TurnState};
pub use direct::DirectChat;
pub use events::{MeetingEvent, MeetingEventKind};
pub use orchestrator::{Canceller, MeetingSnapshot, SendOutcome, TurnOrchestrator};

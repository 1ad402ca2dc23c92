pub mod db;
pub mod io;
pub mod message;
pub mod store;

pub use db::RoundtableDb;

pub use message::{Message, Sender, SessionKey};
pub use store::{ConversationStore, MemoryConversationStore, SqliteConversationStore};

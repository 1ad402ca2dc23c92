//! # Conversation Store
//!
//! Keyed get/set persistence for message lists. The orchestrator owns every
//! write; the store hands back copies and never mutates them.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::db::RoundtableDb;
use super::message::{Message, SessionKey};
use crate::error::{Error, Result};

/// Persistence for sessions. Last write wins.
pub trait ConversationStore: Send + Sync {
    /// Messages stored under `key`; empty when nothing was saved
    fn load(&self, key: &SessionKey) -> Result<Vec<Message>>;

    /// Replace the messages stored under `key`
    fn save(&self, key: &SessionKey, messages: &[Message]) -> Result<()>;

    /// Forget `key`
    fn clear(&self, key: &SessionKey) -> Result<()>;
}

fn lock_err<T>(e: std::sync::PoisonError<T>) -> Error {
    Error::Other(anyhow::anyhow!("Lock error: {}", e))
}

/// SQLite-backed store using the shared [`RoundtableDb`] connection
pub struct SqliteConversationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteConversationStore {
    pub fn new(db: &RoundtableDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }
}

impl ConversationStore for SqliteConversationStore {
    fn load(&self, key: &SessionKey) -> Result<Vec<Message>> {
        let conn = self.conn.lock().map_err(lock_err)?;

        let result: Option<String> = conn
            .query_row(
                "SELECT messages_json FROM sessions WHERE key = ?1",
                params![key.as_key()],
                |row| row.get(0),
            )
            .optional()?;

        match result {
            Some(data) => Ok(serde_json::from_str(&data)?),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, key: &SessionKey, messages: &[Message]) -> Result<()> {
        let data = serde_json::to_string(messages)?;
        let conn = self.conn.lock().map_err(lock_err)?;

        conn.execute(
            "INSERT OR REPLACE INTO sessions (key, messages_json, updated_at) VALUES (?1, ?2, ?3)",
            params![key.as_key(), data, Utc::now().to_rfc3339()],
        )?;

        tracing::debug!(session = %key, count = messages.len(), "Session saved");
        Ok(())
    }

    fn clear(&self, key: &SessionKey) -> Result<()> {
        let conn = self.conn.lock().map_err(lock_err)?;
        conn.execute("DELETE FROM sessions WHERE key = ?1", params![key.as_key()])?;
        tracing::debug!(session = %key, "Session cleared");
        Ok(())
    }
}

/// In-process store, for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryConversationStore {
    sessions: Mutex<HashMap<SessionKey, Vec<Message>>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationStore for MemoryConversationStore {
    fn load(&self, key: &SessionKey) -> Result<Vec<Message>> {
        let sessions = self.sessions.lock().map_err(lock_err)?;
        Ok(sessions.get(key).cloned().unwrap_or_default())
    }

    fn save(&self, key: &SessionKey, messages: &[Message]) -> Result<()> {
        let mut sessions = self.sessions.lock().map_err(lock_err)?;
        sessions.insert(key.clone(), messages.to_vec());
        Ok(())
    }

    fn clear(&self, key: &SessionKey) -> Result<()> {
        let mut sessions = self.sessions.lock().map_err(lock_err)?;
        sessions.remove(key);
        Ok(())
    }
}

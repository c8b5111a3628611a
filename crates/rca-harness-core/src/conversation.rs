//! Conversation history capability.
//!
//! The chat service only needs to append turns and read a session's history
//! back in order. Session titles and listing live with the concrete SQLite
//! store in the app crate.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::ConversationTurn;

/// Append-only per-session history.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append a turn to the end of a session's history, creating the
    /// session if it does not exist.
    async fn append_turn(&self, session_id: &str, turn: &ConversationTurn) -> Result<()>;

    /// The session's turns in append order. Unknown sessions are empty.
    async fn get_history(&self, session_id: &str) -> Result<Vec<ConversationTurn>>;
}

/// In-memory [`ConversationStore`].
#[derive(Default)]
pub struct InMemoryConversationStore {
    sessions: RwLock<HashMap<String, Vec<ConversationTurn>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn append_turn(&self, session_id: &str, turn: &ConversationTurn) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| anyhow!("conversation store lock poisoned"))?;
        sessions
            .entry(session_id.to_string())
            .or_default()
            .push(turn.clone());
        Ok(())
    }

    async fn get_history(&self, session_id: &str) -> Result<Vec<ConversationTurn>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| anyhow!("conversation store lock poisoned"))?;
        Ok(sessions.get(session_id).cloned().unwrap_or_default())
    }
}

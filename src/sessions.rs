//! Chat sessions and their message history in SQLite.
//!
//! [`SqliteConversationStore`] implements the core [`ConversationStore`]
//! capability used by the chat service, plus the session CRUD the HTTP
//! server exposes.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Local, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use rca_harness_core::conversation::ConversationStore;
use rca_harness_core::models::{ConversationTurn, EvidenceRef, Role};

/// Session listing entry.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionInfo {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A stored message with its timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    pub evidence: Vec<EvidenceRef>,
    pub created_at: String,
}

const TITLE_CHARS: usize = 60;

pub struct SqliteConversationStore {
    pool: SqlitePool,
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// `Chat Session YYYY-MM-DD HH:MM` in local time.
pub fn default_title() -> String {
    format!("Chat Session {}", Local::now().format("%Y-%m-%d %H:%M"))
}

fn title_from_message(message: &str) -> String {
    let line = message.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let line = line.trim();
    if line.is_empty() {
        return default_title();
    }
    let mut title: String = line.chars().take(TITLE_CHARS).collect();
    if line.chars().count() > TITLE_CHARS {
        title.push_str("...");
    }
    title
}

impl SqliteConversationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_session(&self, title: Option<&str>) -> Result<SessionInfo> {
        let id = Uuid::new_v4().to_string();
        let title = match title.map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => default_title(),
        };
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO chat_sessions (id, title, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&title)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(SessionInfo {
            id,
            title,
            created_at: format_ts_iso(now),
            updated_at: format_ts_iso(now),
        })
    }

    /// All sessions, most recently active first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        let rows = sqlx::query(
            "SELECT id, title, created_at, updated_at FROM chat_sessions ORDER BY updated_at DESC, created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| SessionInfo {
                id: row.get("id"),
                title: row.get("title"),
                created_at: format_ts_iso(row.get("created_at")),
                updated_at: format_ts_iso(row.get("updated_at")),
            })
            .collect())
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<SessionInfo>> {
        let row = sqlx::query(
            "SELECT id, title, created_at, updated_at FROM chat_sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| SessionInfo {
            id: r.get("id"),
            title: r.get("title"),
            created_at: format_ts_iso(r.get("created_at")),
            updated_at: format_ts_iso(r.get("updated_at")),
        }))
    }

    /// Returns `false` when the session does not exist.
    pub async fn rename_session(&self, id: &str, title: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE chat_sessions SET title = ?, updated_at = ? WHERE id = ?")
            .bind(title)
            .bind(Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a session and, by cascade, its messages.
    pub async fn delete_session(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM chat_sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn messages(&self, session_id: &str) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT role, content, evidence_json, created_at FROM chat_messages WHERE session_id = ? ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let role: String = row.get("role");
            let evidence_json: Option<String> = row.get("evidence_json");
            let evidence = match evidence_json {
                Some(json) => serde_json::from_str(&json)?,
                None => Vec::new(),
            };
            messages.push(StoredMessage {
                role: Role::parse(&role)
                    .ok_or_else(|| anyhow::anyhow!("unknown message role: {}", role))?,
                content: row.get("content"),
                evidence,
                created_at: format_ts_iso(row.get("created_at")),
            });
        }
        Ok(messages)
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn append_turn(&self, session_id: &str, turn: &ConversationTurn) -> Result<()> {
        let now = Utc::now().timestamp();
        let evidence_json = if turn.evidence.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&turn.evidence)?)
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO chat_sessions (id, title, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at
            "#,
        )
        .bind(session_id)
        .bind(title_from_message(&turn.content))
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO chat_messages (session_id, role, content, evidence_json, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(evidence_json)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_history(&self, session_id: &str) -> Result<Vec<ConversationTurn>> {
        Ok(self
            .messages(session_id)
            .await?
            .into_iter()
            .map(|m| ConversationTurn {
                role: m.role,
                content: m.content,
                evidence: m.evidence,
            })
            .collect())
    }
}

//! Append-only conversation history

use anyhow::{Context, Result};
use llm_core::{ChatMessage, Role};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use super::database::SharedDatabase;

/// One row of the history table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub session_id: String,
    pub agent_type: String,
    pub role: Role,
    pub content: String,
}

/// Per-session overview used by `relay sessions list`
#[derive(Debug, Clone, Serialize)]
pub struct SessionOverview {
    pub session_id: String,
    pub agent_type: String,
    pub message_count: usize,
}

/// Conversation history store
#[derive(Debug, Clone)]
pub struct HistoryStore {
    db: SharedDatabase,
}

impl HistoryStore {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Persist one message; returns its row id
    pub fn append(&self, session_id: &str, agent_type: &str, message: &ChatMessage) -> Result<i64> {
        let conn = self.db.conn();

        conn.execute(
            "INSERT INTO conversation_history (instance_id, agent_type, role, content)
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, agent_type, message.role.as_str(), message.content],
        )
        .with_context(|| format!("Failed to persist message for session {}", session_id))?;

        Ok(conn.last_insert_rowid())
    }

    /// Messages of a session in insertion order
    pub fn load_session(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        Ok(self
            .session_entries(session_id)?
            .into_iter()
            .map(|e| ChatMessage::new(e.role, e.content))
            .collect())
    }

    /// Full rows of a session in insertion order
    pub fn session_entries(&self, session_id: &str) -> Result<Vec<HistoryEntry>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, instance_id, agent_type, role, content
             FROM conversation_history WHERE instance_id = ?1 ORDER BY id",
        )?;

        let rows = stmt.query_map([session_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, session_id, agent_type, role, content) = row?;
            entries.push(HistoryEntry {
                id,
                session_id,
                agent_type,
                role: role.parse()?,
                content,
            });
        }
        Ok(entries)
    }

    /// Agent type that owns a session, if the session exists
    pub fn session_agent_type(&self, session_id: &str) -> Result<Option<String>> {
        let agent_type = self
            .db
            .conn()
            .query_row(
                "SELECT agent_type FROM conversation_history WHERE instance_id = ?1 ORDER BY id LIMIT 1",
                [session_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(agent_type)
    }

    /// Content of every non-system message ever recorded for an agent type
    pub fn contents_for_agent(&self, agent_type: &str) -> Result<Vec<String>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT content FROM conversation_history
             WHERE agent_type = ?1 AND role != 'system' ORDER BY id",
        )?;
        let rows = stmt.query_map([agent_type], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Sessions, most recently active first
    pub fn list_sessions(&self, agent_type: Option<&str>) -> Result<Vec<SessionOverview>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT instance_id, agent_type, COUNT(*)
             FROM conversation_history
             WHERE ?1 IS NULL OR agent_type = ?1
             GROUP BY instance_id, agent_type
             ORDER BY MAX(id) DESC",
        )?;

        let rows = stmt.query_map([agent_type], |row| {
            Ok(SessionOverview {
                session_id: row.get(0)?,
                agent_type: row.get(1)?,
                message_count: row.get::<_, i64>(2)? as usize,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

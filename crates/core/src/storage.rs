//! Durable message storage.
//!
//! The agent loop writes every appended message through a `MessageStore`
//! on a background task. Persisted rows are immutable once written.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::message::Role;

/// A message as read back from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Backend name for logs (e.g., "sqlite").
    fn name(&self) -> &str;

    /// Append a message and return its id.
    async fn store_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<i64, StorageError>;

    /// The most recent `limit` messages of a session, oldest first.
    async fn get_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StorageError>;

    /// The most recent `limit` user and assistant messages, oldest first.
    /// Tool and system rows do not count toward `limit`.
    async fn get_conversation(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut fetch = limit;
        loop {
            let rows = self.get_messages(session_id, fetch).await?;
            let exhausted = rows.len() < fetch;
            let mut turns: Vec<StoredMessage> = rows
                .into_iter()
                .filter(|m| matches!(m.role, Role::User | Role::Assistant))
                .collect();
            if turns.len() >= limit || exhausted {
                let excess = turns.len().saturating_sub(limit);
                turns.drain(..excess);
                return Ok(turns);
            }
            fetch = fetch.saturating_mul(2).min(i64::MAX as usize);
        }
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

//! In-memory message store, useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::Utc;
use clawloop_core::error::StorageError;
use clawloop_core::message::Role;
use clawloop_core::storage::{MessageStore, StoredMessage};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    sessions: HashMap<String, Vec<StoredMessage>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total messages across all sessions.
    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn store_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<i64, StorageError> {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .sessions
            .entry(session_id.to_string())
            .or_default()
            .push(StoredMessage {
                id,
                session_id: session_id.to_string(),
                role,
                content: content.to_string(),
                created_at: Utc::now(),
            });
        Ok(id)
    }

    async fn get_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        let inner = self.inner.read().await;
        let messages = inner
            .sessions
            .get(session_id)
            .map(|all| all[all.len().saturating_sub(limit)..].to_vec())
            .unwrap_or_default();
        Ok(messages)
    }
}

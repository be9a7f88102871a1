//! No-op message store, disables persistence entirely.

use async_trait::async_trait;
use clawloop_core::error::StorageError;
use clawloop_core::message::Role;
use clawloop_core::storage::{MessageStore, StoredMessage};

pub struct NoopStore;

#[async_trait]
impl MessageStore for NoopStore {
    fn name(&self) -> &str {
        "none"
    }

    async fn store_message(
        &self,
        _session_id: &str,
        _role: Role,
        _content: &str,
    ) -> Result<i64, StorageError> {
        Ok(0)
    }

    async fn get_messages(
        &self,
        _session_id: &str,
        _limit: usize,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        Ok(Vec::new())
    }
}

//! Memory and message storage for clawloop.
//!
//! `MemoryManager` keeps categorized facts (short-term list plus the
//! `MEMORY.md` long-term store). The `MessageStore` backends persist the
//! raw conversation transcript.

pub mod in_memory;
pub mod manager;
pub mod noop;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use in_memory::InMemoryStore;
pub use manager::{DEFAULT_MAX_LONG_TERM, MemoryEntry, MemoryManager, message_importance};
pub use noop::NoopStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use clawloop_config::{AppConfig, StorageBackend};
use clawloop_core::error::StorageError;
use clawloop_core::storage::MessageStore;
use std::sync::Arc;

/// Open the message store selected by `[storage] backend`.
pub async fn open_store(config: &AppConfig) -> Result<Arc<dyn MessageStore>, StorageError> {
    match config.storage.backend {
        #[cfg(feature = "sqlite")]
        StorageBackend::Sqlite => {
            let path = config.sqlite_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Connection(format!("{}: {e}", parent.display())))?;
            }
            let url = format!("sqlite://{}", path.display());
            Ok(Arc::new(SqliteStore::new(&url).await?))
        }
        #[cfg(feature = "postgres")]
        StorageBackend::Postgres => {
            let url = config.storage.postgres_url.as_deref().ok_or_else(|| {
                StorageError::Connection("storage.postgres_url is not set".into())
            })?;
            Ok(Arc::new(PostgresStore::connect(url).await?))
        }
        StorageBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
        StorageBackend::None => Ok(Arc::new(NoopStore)),
        #[allow(unreachable_patterns)]
        other => Err(StorageError::Connection(format!(
            "storage backend {other:?} is not compiled in"
        ))),
    }
}

/// Build the memory manager from `[memory]`, loading the existing file.
pub fn open_memory(config: &AppConfig) -> Result<MemoryManager, clawloop_core::error::MemoryError> {
    MemoryManager::load(
        config.memory_file_path(),
        config.memory.max_short_term,
        config.memory.long_term_importance_threshold,
    )
    .map(|m| m.with_max_long_term(config.memory.max_long_term))
}

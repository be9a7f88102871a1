//! PostgreSQL message store.
//!
//! Behind the `postgres` feature flag:
//!
//! ```toml
//! clawloop-memory = { workspace = true, features = ["postgres"] }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clawloop_core::error::StorageError;
use clawloop_core::message::Role;
use clawloop_core::storage::{MessageStore, StoredMessage};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::str::FromStr;
use tracing::info;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id          BIGSERIAL PRIMARY KEY,
    session_id  TEXT NOT NULL,
    role        TEXT NOT NULL,
    content     TEXT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, id DESC);
"#;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and create the schema if needed.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Connection(format!("PostgreSQL connection failed: {e}")))?;

        let store = Self { pool };
        store.migrate().await?;
        info!("Connected to PostgreSQL message store");
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(format!("Migration failed: {e}")))?;
        Ok(())
    }

    fn row_to_message(row: &PgRow) -> Result<StoredMessage, StorageError> {
        let q = |e: sqlx::Error| StorageError::Query(e.to_string());
        let role: String = row.try_get("role").map_err(q)?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(q)?;
        Ok(StoredMessage {
            id: row.try_get("id").map_err(q)?,
            session_id: row.try_get("session_id").map_err(q)?,
            role: Role::from_str(&role).map_err(StorageError::Query)?,
            content: row.try_get("content").map_err(q)?,
            created_at,
        })
    }
}

#[async_trait]
impl MessageStore for PostgresStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn store_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<i64, StorageError> {
        let row = sqlx::query(
            "INSERT INTO messages (session_id, role, content) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::Query(format!("insert failed: {e}")))?;

        row.try_get("id")
            .map_err(|e| StorageError::Query(e.to_string()))
    }

    async fn get_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, role, content, created_at FROM (
                SELECT * FROM messages WHERE session_id = $1 ORDER BY id DESC LIMIT $2
            ) recent ORDER BY id ASC
            "#,
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Query(format!("select failed: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.pool.close().await;
        Ok(())
    }
}

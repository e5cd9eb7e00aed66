//! Durable storage for the offline queue.
//!
//! The coordinator saves a full snapshot of the queue after every change and
//! loads it back on startup, so writes made offline survive a restart.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use sync_core::QueuedOperation;
use sync_types::CodecError;
use thiserror::Error;

/// Queue storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored operation could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Persistence for queued operations.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Load every stored operation in queue order.
    async fn load(&self) -> Result<Vec<QueuedOperation>, StoreError>;

    /// Replace the stored queue with `ops`.
    async fn save(&self, ops: &[QueuedOperation]) -> Result<(), StoreError>;
}

/// SQLite-based queue storage.
#[derive(Clone)]
pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    /// Open (or create) a queue database at `path`.
    pub async fn new(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path.to_str().unwrap_or("queue.db"))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(":memory:")?;

        // A single connection that never expires: the database lives in it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS offline_queue (
                seq INTEGER PRIMARY KEY,
                payload BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn load(&self) -> Result<Vec<QueuedOperation>, StoreError> {
        let rows: Vec<QueueRow> =
            sqlx::query_as("SELECT payload FROM offline_queue ORDER BY seq")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(QueuedOperation::try_from).collect()
    }

    async fn save(&self, ops: &[QueuedOperation]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM offline_queue")
            .execute(&mut *tx)
            .await?;

        for (seq, op) in ops.iter().enumerate() {
            sqlx::query("INSERT INTO offline_queue (seq, payload) VALUES (?1, ?2)")
                .bind(seq as i64)
                .bind(op.to_bytes()?)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        tracing::debug!(count = ops.len(), "offline queue persisted");
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct QueueRow {
    payload: Vec<u8>,
}

impl TryFrom<QueueRow> for QueuedOperation {
    type Error = StoreError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        Ok(QueuedOperation::from_bytes(&row.payload)?)
    }
}

// Database module
// Durable key-value storage backing the per-session embedding cache

pub mod sqlite;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use futures::stream::BoxStream;
use thiserror::Error;

pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A durable map from string keys to byte blobs.
///
/// Writes must be visible to every subsequent read once the call returns.
/// Single-key operations are atomic; `set_many` is atomic across its entries.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    async fn set_many(&self, entries: &[(&str, &[u8])]) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Stream every key currently stored, in ascending order.
    ///
    /// Each call queries the store afresh, so the stream can be restarted by
    /// calling `keys` again.
    fn keys(&self) -> BoxStream<'_, Result<String, StoreError>>;

    /// Time of the most recent write, when the store tracks it
    async fn last_updated(&self) -> Result<Option<NaiveDateTime>, StoreError> {
        Ok(None)
    }

    /// Release every handle on the underlying storage. Later calls may fail.
    async fn close(&self) {}
}

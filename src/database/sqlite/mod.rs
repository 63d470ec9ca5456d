use async_trait::async_trait;
use chrono::NaiveDateTime;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::{KeyValueStore, StoreError};


pub type DbPool = Pool<Sqlite>;

/// File name of the per-session cache database inside its index directory
pub const CACHE_FILE_NAME: &str = "cache.db";

/// SQLite-backed key-value store. One database file holds one session's cache.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: DbPool,
    path: PathBuf,
}

impl SqliteStore {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self, StoreError> {
        let path = database_path.as_ref().to_path_buf();

        // FULL synchronous mode makes every committed write durable before returning
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool, path };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Open (creating if needed) the cache database inside `index_dir`
    #[inline]
    pub async fn open_in_dir(index_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(index_dir)?;
        Self::new(index_dir.join(CACHE_FILE_NAME)).await
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        debug!("Running cache store migrations for {}", self.path.display());

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await?;

        Ok(())
    }

    /// Number of stored keys
    #[inline]
    pub async fn count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

}

const UPSERT_ENTRY: &str = "INSERT INTO cache_entries (key, value, updated_at)
     VALUES (?1, ?2, CURRENT_TIMESTAMP)
     ON CONFLICT(key) DO UPDATE SET
        value = excluded.value,
        updated_at = excluded.updated_at";

#[async_trait]
impl KeyValueStore for SqliteStore {
    #[inline]
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        sqlx::query(UPSERT_ENTRY)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[inline]
    async fn set_many(&self, entries: &[(&str, &[u8])]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            sqlx::query(UPSERT_ENTRY)
                .bind(*key)
                .bind(*value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    #[inline]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let value: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT value FROM cache_entries WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    #[inline]
    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[inline]
    fn keys(&self) -> BoxStream<'_, Result<String, StoreError>> {
        sqlx::query_scalar::<_, String>("SELECT key FROM cache_entries ORDER BY key")
            .fetch(&self.pool)
            .map_err(StoreError::from)
            .boxed()
    }

    #[inline]
    async fn last_updated(&self) -> Result<Option<NaiveDateTime>, StoreError> {
        let updated: Option<NaiveDateTime> =
            sqlx::query_scalar("SELECT MAX(updated_at) FROM cache_entries")
                .fetch_one(&self.pool)
                .await?;
        Ok(updated)
    }

    /// Close all pooled connections so the database file can be removed
    #[inline]
    async fn close(&self) {
        self.pool.close().await;
        info!("Closed cache store at {}", self.path.display());
    }
}

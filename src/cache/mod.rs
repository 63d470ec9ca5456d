// Embedding cache module
// Stores one rendered page image and its embedding per document page


pub mod key;

use chrono::NaiveDateTime;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::database::{KeyValueStore, SqliteStore, StoreError};

pub use key::{CacheEntryKey, EMBEDDING_SUFFIX, IMAGE_SUFFIX};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache entry not found: {key}")]
    NotFound { key: String },
    #[error("Corrupt cache entry {key}: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("Cache store error: {0}")]
    Store(#[from] StoreError),
}

/// Page image and embedding storage for a single session index.
///
/// Cloning is cheap; clones share the underlying store.
#[derive(Clone)]
pub struct EmbeddingCache {
    store: Arc<dyn KeyValueStore>,
}

impl fmt::Debug for EmbeddingCache {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingCache").finish_non_exhaustive()
    }
}

impl EmbeddingCache {
    #[inline]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Open the SQLite-backed cache stored in `index_dir`
    #[inline]
    pub async fn open(index_dir: &Path) -> Result<Self, CacheError> {
        let store = SqliteStore::open_in_dir(index_dir).await?;
        debug!("Opened embedding cache at {}", index_dir.display());
        Ok(Self::new(Arc::new(store)))
    }

    #[inline]
    pub async fn store_image(&self, key: &CacheEntryKey, image: &[u8]) -> Result<(), CacheError> {
        self.store.set(&key.image_key(), image).await?;
        Ok(())
    }

    #[inline]
    pub async fn store_embedding(
        &self,
        key: &CacheEntryKey,
        embedding: &[f32],
    ) -> Result<(), CacheError> {
        let bytes = encode_embedding(embedding);
        self.store.set(&key.embedding_key(), &bytes).await?;
        Ok(())
    }

    /// Write both halves of a page in a single store call
    #[inline]
    pub async fn store_page(
        &self,
        key: &CacheEntryKey,
        image: &[u8],
        embedding: &[f32],
    ) -> Result<(), CacheError> {
        let image_key = key.image_key();
        let embedding_key = key.embedding_key();
        let embedding_bytes = encode_embedding(embedding);

        self.store
            .set_many(&[
                (image_key.as_str(), image),
                (embedding_key.as_str(), embedding_bytes.as_slice()),
            ])
            .await?;
        Ok(())
    }

    #[inline]
    pub async fn lookup_image(&self, key: &CacheEntryKey) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.store.get(&key.image_key()).await?)
    }

    #[inline]
    pub async fn lookup_embedding(
        &self,
        key: &CacheEntryKey,
    ) -> Result<Option<Vec<f32>>, CacheError> {
        let raw_key = key.embedding_key();
        match self.store.get(&raw_key).await? {
            Some(bytes) => decode_embedding(&bytes)
                .map(Some)
                .map_err(|reason| CacheError::Corrupt {
                    key: raw_key,
                    reason,
                }),
            None => Ok(None),
        }
    }

    #[inline]
    pub async fn get_image(&self, key: &CacheEntryKey) -> Result<Vec<u8>, CacheError> {
        self.lookup_image(key)
            .await?
            .ok_or_else(|| CacheError::NotFound {
                key: key.image_key(),
            })
    }

    #[inline]
    pub async fn get_embedding(&self, key: &CacheEntryKey) -> Result<Vec<f32>, CacheError> {
        self.lookup_embedding(key)
            .await?
            .ok_or_else(|| CacheError::NotFound {
                key: key.embedding_key(),
            })
    }

    /// Lazily stream every raw store key. Each call starts a fresh enumeration.
    #[inline]
    pub fn iter_keys(&self) -> BoxStream<'_, Result<String, CacheError>> {
        self.store.keys().map_err(CacheError::from).boxed()
    }

    /// Sorted base keys of every page that has an embedding
    #[inline]
    pub async fn page_keys(&self) -> Result<Vec<CacheEntryKey>, CacheError> {
        let keys: Vec<String> = self.iter_keys().try_collect().await?;
        Ok(keys
            .iter()
            .filter_map(|raw| CacheEntryKey::from_embedding_key(raw))
            .collect())
    }

    /// When the cache was last written to
    #[inline]
    pub async fn last_updated(&self) -> Result<Option<NaiveDateTime>, CacheError> {
        Ok(self.store.last_updated().await?)
    }

    /// Close the underlying store; the cache must not be used afterwards
    #[inline]
    pub async fn close(&self) {
        self.store.close().await;
    }

    /// Remove both halves of a page. Returns true if anything was removed.
    #[inline]
    pub async fn remove_page(&self, key: &CacheEntryKey) -> Result<bool, CacheError> {
        let removed_image = self.store.delete(&key.image_key()).await?;
        let removed_embedding = self.store.delete(&key.embedding_key()).await?;
        Ok(removed_image || removed_embedding)
    }
}

/// Serialize an embedding as little-endian `f32` values
#[inline]
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize an embedding written by [`encode_embedding`]
#[inline]
pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>, String> {
    if bytes.is_empty() {
        return Err("empty embedding".to_string());
    }

    if bytes.len() % 4 != 0 {
        return Err(format!(
            "embedding length {} is not a multiple of 4",
            bytes.len()
        ));
    }

    let embedding: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    if let Some(position) = embedding.iter().position(|value| !value.is_finite()) {
        return Err(format!("non-finite value at dimension {}", position));
    }

    Ok(embedding)
}

// Retrieval module
// Answers a query with materialized page images from a session index


use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cache::EmbeddingCache;
use crate::encoder::Encoder;
use crate::materialize::{Materializer, RetrievedPage};
use crate::search::search;
use crate::session::{IndexBackend, SessionIndex};
use crate::{DocChatError, Result};

pub struct Retriever {
    encoder: Arc<dyn Encoder>,
    materializer: Materializer,
}

impl Retriever {
    #[inline]
    pub fn new(encoder: Arc<dyn Encoder>, materializer: Materializer) -> Self {
        Self {
            encoder,
            materializer,
        }
    }

    #[inline]
    pub fn materializer(&self) -> &Materializer {
        &self.materializer
    }

    /// Retrieve the `k` pages most relevant to `query` as image paths relative
    /// to the static root.
    ///
    /// A failing primary path falls back once to the encoder's native search on
    /// the session's index. When that fails too the result is empty.
    #[inline]
    pub async fn retrieve(&self, session: &SessionIndex, query: &str, k: usize) -> Vec<String> {
        debug!(
            "Retrieving top {} pages for session {} ({} backend)",
            k,
            session.session_id,
            session.backend.kind()
        );

        let primary = match &session.backend {
            IndexBackend::DiskCache(cache) => self.disk_retrieve(cache, query, k).await,
            IndexBackend::Native(index) => self.native_retrieve(&index.index_name, query, k).await,
        };
        let primary = match primary {
            Ok(pages) => self.materialize(pages, &session.session_id).await,
            Err(e) => Err(e),
        };

        let error = match primary {
            Ok(paths) => {
                info!("Retrieved {} pages for session {}", paths.len(), session.session_id);
                return paths;
            }
            Err(e) => e,
        };

        warn!(
            "Retrieval failed for session {}: {}; falling back to native search",
            session.session_id, error
        );

        let fallback = match self
            .native_retrieve(session.native_index_name(), query, k)
            .await
        {
            Ok(pages) => self.materialize(pages, &session.session_id).await,
            Err(e) => Err(e),
        };

        match fallback {
            Ok(paths) => {
                info!(
                    "Native fallback retrieved {} pages for session {}",
                    paths.len(),
                    session.session_id
                );
                paths
            }
            Err(e) => {
                error!(
                    "Native fallback failed for session {}: {}",
                    session.session_id, e
                );
                Vec::new()
            }
        }
    }

    /// PNG decoding, encoding and fsync run on the blocking pool
    async fn materialize(&self, pages: Vec<RetrievedPage>, session_id: &str) -> Result<Vec<String>> {
        let materializer = self.materializer.clone();
        let session_owned = session_id.to_string();
        tokio::task::spawn_blocking(move || materializer.materialize(&pages, &session_owned))
            .await
            .map_err(|e| DocChatError::Materialize(format!("materialize task failed: {}", e)))?
    }

    async fn disk_retrieve(
        &self,
        cache: &EmbeddingCache,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedPage>> {
        let encoder = Arc::clone(&self.encoder);
        let query_owned = query.to_string();
        let query_embedding = tokio::task::spawn_blocking(move || encoder.encode_query(&query_owned))
            .await
            .map_err(|e| DocChatError::Retrieval(format!("query encoding task failed: {}", e)))?
            .map_err(|e| DocChatError::Retrieval(format!("failed to encode query: {:#}", e)))?;

        let results = search(cache, &query_embedding, k)
            .await
            .map_err(|e| DocChatError::Retrieval(format!("similarity search failed: {}", e)))?;

        Ok(results.into_iter().map(RetrievedPage::Cached).collect())
    }

    async fn native_retrieve(
        &self,
        index_name: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedPage>> {
        let encoder = Arc::clone(&self.encoder);
        let index_owned = index_name.to_string();
        let query_owned = query.to_string();
        let results = tokio::task::spawn_blocking(move || {
            encoder.native_search(&index_owned, &query_owned, k)
        })
        .await
        .map_err(|e| DocChatError::Retrieval(format!("native search task failed: {}", e)))?
        .map_err(|e| DocChatError::Retrieval(format!("native search failed: {:#}", e)))?;

        if results.len() > k {
            warn!(
                "Native search on {} returned {} results for top {}, truncating",
                index_name,
                results.len(),
                k
            );
        }

        Ok(results
            .into_iter()
            .take(k)
            .map(RetrievedPage::Native)
            .collect())
    }
}

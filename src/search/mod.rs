// Similarity search module
// Linear cosine-similarity scan over every cached page embedding

#[cfg(test)]
mod tests;

use futures::TryStreamExt;
use std::cmp::Ordering;
use tracing::{debug, warn};

use crate::cache::{CacheEntryKey, CacheError, EmbeddingCache};

/// A ranked page match from the embedding cache
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub similarity: f32,
    pub image: Vec<u8>,
    pub key: CacheEntryKey,
}

#[derive(Debug, Clone)]
struct ScoredKey {
    similarity: f32,
    key: CacheEntryKey,
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 when either vector has zero norm or the lengths differ, so the
/// result is always a finite value.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)) as f32
}

/// Descending similarity, ascending key on ties
fn rank(a: &ScoredKey, b: &ScoredKey) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| a.key.cmp(&b.key))
}

/// Return the `k` cached pages most similar to `query_embedding`.
///
/// Missing, corrupt or mismatched entries are logged and skipped. Only failures
/// of the underlying store are returned as errors.
#[inline]
pub async fn search(
    cache: &EmbeddingCache,
    query_embedding: &[f32],
    k: usize,
) -> Result<Vec<SearchResult>, CacheError> {
    if k == 0 {
        return Ok(Vec::new());
    }

    // Collected up front so the enumeration releases its connection before any lookup
    let raw_keys: Vec<String> = cache.iter_keys().try_collect().await?;
    let mut scored: Vec<ScoredKey> = Vec::new();

    for raw_key in &raw_keys {
        let Some(key) = CacheEntryKey::from_embedding_key(raw_key) else {
            continue;
        };

        let embedding = match cache.lookup_embedding(&key).await {
            Ok(Some(embedding)) => embedding,
            Ok(None) => {
                warn!("Embedding for {} disappeared during scan, skipping", key);
                continue;
            }
            Err(CacheError::Corrupt { key: raw, reason }) => {
                warn!("Skipping corrupt embedding {}: {}", raw, reason);
                continue;
            }
            Err(CacheError::NotFound { key: raw }) => {
                warn!("Skipping missing embedding {}", raw);
                continue;
            }
            Err(e) => return Err(e),
        };

        if embedding.len() != query_embedding.len() {
            warn!(
                "Skipping {}: embedding has {} dimensions, query has {}",
                key,
                embedding.len(),
                query_embedding.len()
            );
            continue;
        }

        scored.push(ScoredKey {
            similarity: cosine_similarity(query_embedding, &embedding),
            key,
        });
    }

    debug!("Scored {} cached pages", scored.len());
    scored.sort_by(rank);

    let mut results = Vec::with_capacity(k.min(scored.len()));
    for candidate in scored {
        if results.len() == k {
            break;
        }

        match cache.lookup_image(&candidate.key).await? {
            Some(image) => results.push(SearchResult {
                similarity: candidate.similarity,
                image,
                key: candidate.key,
            }),
            None => warn!(
                "Skipping {}: embedding has no matching image",
                candidate.key
            ),
        }
    }

    debug!("Returning {} of top {} results", results.len(), k);
    Ok(results)
}

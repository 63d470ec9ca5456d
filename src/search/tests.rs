use super::*;
use crate::database::{KeyValueStore, SqliteStore};
use std::sync::Arc;
use tempfile::TempDir;

const TOLERANCE: f32 = 1e-5;

async fn create_test_cache() -> (TempDir, SqliteStore, EmbeddingCache) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = SqliteStore::open_in_dir(&temp_dir.path().join("session"))
        .await
        .expect("should open store");
    let cache = EmbeddingCache::new(Arc::new(store.clone()));
    (temp_dir, store, cache)
}

async fn add_page(cache: &EmbeddingCache, file: &str, page: usize, embedding: &[f32]) {
    let image = format!("image of {} page {}", file, page);
    cache
        .store_page(&CacheEntryKey::new(file, page), image.as_bytes(), embedding)
        .await
        .expect("should store page");
}

#[test]
fn self_similarity_is_one() {
    let vectors: [&[f32]; 4] = [
        &[1.0, 0.0],
        &[0.3, -0.7, 2.5],
        &[1e-3, 4e-3, -2e-3],
        &[100.0, 200.0, 300.0, 400.0],
    ];

    for v in vectors {
        assert!((cosine_similarity(v, v) - 1.0).abs() < TOLERANCE);
    }
}

#[test]
fn similarity_is_symmetric() {
    let a = [0.2, 0.9, -0.4];
    let b = [0.7, -0.1, 0.3];
    assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
}

#[test]
fn degenerate_similarity_is_zero() {
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 0.0]), 0.0);
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
    assert_eq!(cosine_similarity(&[], &[]), 0.0);
}

#[test]
fn opposite_vectors() {
    assert!((cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]) + 1.0).abs() < TOLERANCE);
    assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < TOLERANCE);
}

#[tokio::test]
async fn ranks_by_cosine_similarity() {
    let (_temp_dir, _store, cache) = create_test_cache().await;
    add_page(&cache, "doc.pdf", 0, &[1.0, 0.0]).await;
    add_page(&cache, "doc.pdf", 1, &[0.0, 1.0]).await;
    add_page(&cache, "doc.pdf", 2, &[0.9, 0.1]).await;

    let results = search(&cache, &[1.0, 0.0], 2)
        .await
        .expect("search should succeed");

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].key, CacheEntryKey::new("doc.pdf", 0));
    assert!((results[0].similarity - 1.0).abs() < TOLERANCE);
    assert_eq!(results[0].image, b"image of doc.pdf page 0");

    assert_eq!(results[1].key, CacheEntryKey::new("doc.pdf", 2));
    assert!((results[1].similarity - 0.993_883_7).abs() < 1e-4);
}

#[tokio::test]
async fn empty_cache_returns_nothing() {
    let (_temp_dir, _store, cache) = create_test_cache().await;

    let results = search(&cache, &[1.0, 0.0], 3)
        .await
        .expect("search should succeed");
    assert!(results.is_empty());
}

#[tokio::test]
async fn result_count_bounds() {
    let (_temp_dir, _store, cache) = create_test_cache().await;
    for page in 0..5 {
        add_page(&cache, "doc.pdf", page, &[1.0, page as f32]).await;
    }

    for k in 0..8 {
        let results = search(&cache, &[1.0, 1.0], k)
            .await
            .expect("search should succeed");
        assert_eq!(results.len(), k.min(5), "k = {}", k);
    }
}

#[tokio::test]
async fn ties_break_on_key_order() {
    let (_temp_dir, _store, cache) = create_test_cache().await;
    add_page(&cache, "c.pdf", 0, &[1.0, 1.0]).await;
    add_page(&cache, "a.pdf", 0, &[2.0, 2.0]).await;
    add_page(&cache, "b.pdf", 0, &[3.0, 3.0]).await;

    for _ in 0..3 {
        let results = search(&cache, &[1.0, 1.0], 3)
            .await
            .expect("search should succeed");
        let keys: Vec<&str> = results.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a.pdf_0", "b.pdf_0", "c.pdf_0"]);
    }
}

#[tokio::test]
async fn skips_orphans_and_corrupt_entries() {
    let (_temp_dir, store, cache) = create_test_cache().await;
    add_page(&cache, "good.pdf", 0, &[1.0, 0.0]).await;
    add_page(&cache, "good.pdf", 1, &[0.5, 0.5]).await;

    // Embedding without an image, best possible score
    cache
        .store_embedding(&CacheEntryKey::new("orphan.pdf", 0), &[1.0, 0.0])
        .await
        .expect("should store embedding");
    // Image without an embedding is never considered
    cache
        .store_image(&CacheEntryKey::new("lonely.pdf", 0), b"img")
        .await
        .expect("should store image");
    // Undecodable embedding bytes
    store
        .set("broken.pdf_0_embedding", &[1, 2, 3])
        .await
        .expect("should write raw bytes");
    store
        .set("broken.pdf_0_image", b"img")
        .await
        .expect("should write raw bytes");
    // Wrong dimensionality
    add_page(&cache, "wide.pdf", 0, &[1.0, 0.0, 0.0]).await;

    let results = search(&cache, &[1.0, 0.0], 3)
        .await
        .expect("search should succeed");

    let keys: Vec<&str> = results.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["good.pdf_0", "good.pdf_1"]);
}

#[tokio::test]
async fn zero_query_keeps_total_order() {
    let (_temp_dir, _store, cache) = create_test_cache().await;
    add_page(&cache, "b.pdf", 0, &[1.0, 0.0]).await;
    add_page(&cache, "a.pdf", 0, &[0.0, 1.0]).await;

    let results = search(&cache, &[0.0, 0.0], 2)
        .await
        .expect("search should succeed");

    assert!(results.iter().all(|r| r.similarity == 0.0));
    assert_eq!(results[0].key.as_str(), "a.pdf_0");
    assert_eq!(results[1].key.as_str(), "b.pdf_0");
}

#[tokio::test]
async fn sees_partially_indexed_session() {
    let (_temp_dir, _store, cache) = create_test_cache().await;
    add_page(&cache, "first.pdf", 0, &[1.0, 0.0]).await;

    // A query issued between two indexing writes only sees what has landed
    let mid_index = search(&cache, &[1.0, 0.0], 5)
        .await
        .expect("search should succeed");
    assert_eq!(mid_index.len(), 1);

    add_page(&cache, "second.pdf", 0, &[0.8, 0.2]).await;
    let after_index = search(&cache, &[1.0, 0.0], 5)
        .await
        .expect("search should succeed");
    assert_eq!(after_index.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_searches_on_one_session() {
    let (_temp_dir, _store, cache) = create_test_cache().await;
    for page in 0..20 {
        let angle = page as f32 / 20.0;
        add_page(&cache, "manual.pdf", page, &[1.0 - angle, angle]).await;
    }

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { search(&cache, &[1.0, 0.0], 3).await })
        })
        .collect();

    let joined = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        futures::future::join_all(handles),
    )
    .await
    .expect("concurrent searches should not stall on the connection pool");

    for handle in joined {
        let results = handle
            .expect("task should join")
            .expect("search should succeed");
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].key.as_str(), "manual.pdf_0");
    }
}

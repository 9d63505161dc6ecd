//! Tests for keyed construction and removal under concurrency.

use super::{BrokenProvider, GatedProvider};
use crate::embeddings::providers::trigram::TrigramProvider;
use crate::embeddings::EmbeddingProvider;
use crate::flat_index::FlatBackend;
use crate::key::IndexKey;
use crate::pool::IndexPool;
use crate::types::Metadata;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

fn pool(temp: &TempDir) -> Arc<IndexPool> {
    Arc::new(IndexPool::new(temp.path(), Arc::new(FlatBackend)))
}

fn trigram() -> Arc<dyn EmbeddingProvider> {
    Arc::new(TrigramProvider::new(16))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_loads_share_one_construction() {
    let temp = TempDir::new().unwrap();
    let pool = pool(&temp);
    let key = IndexKey::new("samples", "trigram_v1");
    let gate = Arc::new(Notify::new());
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(GatedProvider::new(16, Arc::clone(&gate)));

    let loads: Vec<_> = (0..16)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let key = key.clone();
            let provider = Arc::clone(&provider);
            tokio::spawn(async move { pool.load(&key, provider).await })
        })
        .collect();

    // Let every task reach the slot before the single probe may finish
    tokio::time::sleep(Duration::from_millis(50)).await;
    gate.notify_one();

    let handles: Vec<_> = futures::future::join_all(loads)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    assert_eq!(pool.construction_count(), 1);
    assert_eq!(pool.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_construction_does_not_block_other_keys() {
    let temp = TempDir::new().unwrap();
    let pool = pool(&temp);
    let gate = Arc::new(Notify::new());

    let slow = {
        let pool = Arc::clone(&pool);
        let provider: Arc<dyn EmbeddingProvider> =
            Arc::new(GatedProvider::new(16, Arc::clone(&gate)));
        tokio::spawn(async move { pool.load(&IndexKey::new("slow", "v"), provider).await })
    };

    let fast = tokio::time::timeout(
        Duration::from_secs(5),
        pool.load(&IndexKey::new("fast", "v"), trigram()),
    )
    .await
    .expect("load of an unrelated key was blocked");
    assert!(fast.is_ok());

    gate.notify_one();
    slow.await.unwrap().unwrap();
    assert_eq!(pool.construction_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_construction_installs_nothing() {
    let temp = TempDir::new().unwrap();
    let pool = pool(&temp);
    let key = IndexKey::new("samples", "v");

    let loads: Vec<_> = (0..8)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let key = key.clone();
            tokio::spawn(async move { pool.load(&key, Arc::new(BrokenProvider)).await })
        })
        .collect();
    for joined in futures::future::join_all(loads).await {
        let err = joined.unwrap().unwrap_err();
        assert!(matches!(err, kbvault_core::AppError::Construction(_)));
    }

    assert!(pool.is_empty());
    assert!(!pool.contains(&key));
    assert_eq!(pool.construction_count(), 0);

    pool.load(&key, trigram()).await.unwrap();
    assert_eq!(pool.construction_count(), 1);
}

#[tokio::test]
async fn test_removed_handle_stays_usable() {
    let temp = TempDir::new().unwrap();
    let pool = pool(&temp);
    let key = IndexKey::new("samples", "v");

    let old = pool.load(&key, trigram()).await.unwrap();
    let mut lease = old.acquire().await;
    lease
        .add(&["kept".to_string()], &[vec![1.0; 16]], &[Metadata::new()])
        .unwrap();

    let removed = pool.remove(&key).unwrap();
    assert!(Arc::ptr_eq(&removed, &old));
    assert!(!pool.contains(&key));

    // Lease held across the removal remains valid
    assert_eq!(lease.len(), 1);
    drop(lease);

    let fresh = pool.load(&key, trigram()).await.unwrap();
    assert!(!Arc::ptr_eq(&fresh, &old));
    assert_eq!(fresh.acquire().await.len(), 0);
    assert_eq!(old.acquire().await.len(), 1);
    assert_eq!(pool.construction_count(), 2);
}

#[tokio::test]
async fn test_remove_unknown_key_is_not_found() {
    let temp = TempDir::new().unwrap();
    let pool = pool(&temp);
    let err = pool.remove(&IndexKey::new("nope", "v")).unwrap_err();
    assert!(err.is_not_found());
}

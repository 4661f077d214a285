//! Concurrent callers on one thread namespace

use checkpoint_kv::{
    BackendCapabilityProfile, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, CheckpointStore,
    CheckpointTuple, InMemoryBackend, PendingWriteEntry, StoreConfig,
};
use futures::TryStreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const WRITERS: usize = 32;

fn thread() -> CheckpointConfig {
    CheckpointConfig::new("shared").with_checkpoint_ns("main")
}

async fn parallel_puts(store: Arc<CheckpointStore>) {
    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .put(
                        &thread(),
                        Checkpoint::new(format!("c{:03}", i), vec![i as u8]),
                        CheckpointMetadata::new().with_step(i as i32),
                    )
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
}

async fn assert_complete(store: &CheckpointStore) {
    let tuples: Vec<CheckpointTuple> = store
        .list(&thread(), None, None, Some(WRITERS))
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    let ids: Vec<String> = tuples.into_iter().map(|t| t.record.checkpoint_id).collect();
    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(ids.len(), WRITERS);
    assert_eq!(unique.len(), WRITERS);
    for i in 0..WRITERS {
        assert!(unique.contains(&format!("c{:03}", i)));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_puts_are_all_indexed() {
    let store = Arc::new(CheckpointStore::new(InMemoryBackend::new(), StoreConfig::default()).unwrap());
    parallel_puts(Arc::clone(&store)).await;
    assert_complete(&store).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_puts_without_transactions() {
    let backend = InMemoryBackend::with_profile(BackendCapabilityProfile::full().with_multi_key_atomicity(false))
        .with_latency(Duration::from_millis(1));
    let store = Arc::new(CheckpointStore::new(backend, StoreConfig::default()).unwrap());
    parallel_puts(Arc::clone(&store)).await;
    assert_complete(&store).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_puts_with_split_index() {
    let store = Arc::new(
        CheckpointStore::new(
            InMemoryBackend::with_profile(BackendCapabilityProfile::key_value()),
            StoreConfig::default(),
        )
        .unwrap()
        .with_index_backend(InMemoryBackend::new())
        .unwrap(),
    );
    parallel_puts(Arc::clone(&store)).await;
    assert_complete(&store).await;
}

async fn parallel_appends(profile: BackendCapabilityProfile) -> usize {
    let backend = InMemoryBackend::with_profile(profile).with_latency(Duration::from_millis(1));
    let config = StoreConfig::default().with_cas_retry(
        checkpoint_kv::RetryConfig::new(256)
            .with_initial_backoff(1)
            .with_max_backoff(5),
    );
    let store = Arc::new(CheckpointStore::new(backend, config).unwrap());
    let target = thread().for_checkpoint("c1");

    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let store = Arc::clone(&store);
            let target = target.clone();
            tokio::spawn(async move {
                store
                    .put_writes(
                        &target,
                        vec![PendingWriteEntry::new("ch", vec![i as u8], format!("task-{}", i), "")],
                    )
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    store
        .put(&thread(), Checkpoint::new("c1", Vec::new()), CheckpointMetadata::new())
        .await
        .unwrap();
    store.get_tuple(&target).await.unwrap().pending_writes.len()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cas_appends_lose_nothing() {
    assert_eq!(parallel_appends(BackendCapabilityProfile::key_value()).await, WRITERS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_list_appends_lose_nothing() {
    assert_eq!(parallel_appends(BackendCapabilityProfile::full()).await, WRITERS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_listing_is_stable_under_concurrent_puts() {
    let store = Arc::new(CheckpointStore::new(InMemoryBackend::new(), StoreConfig::default()).unwrap());
    for i in 0..10 {
        store
            .put(&thread(), Checkpoint::new(format!("old{:02}", i), Vec::new()), CheckpointMetadata::new())
            .await
            .unwrap();
    }

    let writer = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for i in 0..50 {
                store
                    .put(&thread(), Checkpoint::new(format!("new{:02}", i), Vec::new()), CheckpointMetadata::new())
                    .await
                    .unwrap();
            }
        })
    };

    let before = thread().for_checkpoint("old05");
    let older: Vec<CheckpointTuple> = store
        .list(&thread(), None, Some(&before), Some(3))
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    writer.await.unwrap();

    let ids: Vec<&str> = older.iter().map(|t| t.checkpoint_id()).collect();
    assert_eq!(ids, vec!["old04", "old03", "old02"]);
}

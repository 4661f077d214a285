//! Synchronous surface mirrors the async one

use checkpoint_kv::{
    BackendCapabilityProfile, BlockingCheckpointStore, Checkpoint, CheckpointConfig, CheckpointError,
    CheckpointMetadata, CheckpointStore, InMemoryBackend, PendingWriteEntry, StoreConfig,
};

fn blocking(profile: BackendCapabilityProfile) -> BlockingCheckpointStore {
    let store = CheckpointStore::new(InMemoryBackend::with_profile(profile), StoreConfig::default()).unwrap();
    BlockingCheckpointStore::new(store).unwrap()
}

fn thread() -> CheckpointConfig {
    CheckpointConfig::new("t1").with_checkpoint_ns("main")
}

#[test]
fn test_blocking_put_get_list_delete() {
    let store = blocking(BackendCapabilityProfile::full());
    let mut head = thread();
    for id in ["c1", "c2", "c3"] {
        head = store
            .put(&head, Checkpoint::new(id, id.as_bytes().to_vec()), CheckpointMetadata::new())
            .unwrap();
    }

    assert_eq!(store.get_tuple(&thread()).unwrap().checkpoint_id(), "c3");
    assert_eq!(store.get(&head).unwrap().unwrap().record.payload, b"c3".to_vec());

    let ids: Vec<String> = store
        .list(&thread(), None, None, None)
        .unwrap()
        .map(|t| t.unwrap().record.checkpoint_id)
        .collect();
    assert_eq!(ids, vec!["c3", "c2", "c1"]);

    let before = thread().for_checkpoint("c2");
    let mut older = store.list(&thread(), None, Some(&before), Some(5)).unwrap();
    assert_eq!(older.next().unwrap().unwrap().checkpoint_id(), "c1");
    assert!(older.next().is_none());

    let receipt = store
        .put_writes(&head, vec![PendingWriteEntry::new("ch", b"v".to_vec(), "task", "")])
        .unwrap();
    assert_eq!(receipt.appended, 1);

    store.delete_thread(&thread()).unwrap();
    assert!(store.get(&thread()).unwrap().is_none());
}

#[test]
fn test_blocking_gating_matches_async() {
    let store = blocking(BackendCapabilityProfile::key_value());
    store
        .put(&thread(), Checkpoint::new("c1", Vec::new()), CheckpointMetadata::new())
        .unwrap();

    assert!(!store.capabilities().supports_history());
    assert!(matches!(
        store.get_tuple(&thread()),
        Err(CheckpointError::LatestLookupUnsupported { .. })
    ));
    assert!(matches!(
        store.list(&thread(), None, None, None).err(),
        Some(CheckpointError::ListUnsupported { .. })
    ));
    assert!(matches!(
        store.delete_thread(&thread()),
        Err(CheckpointError::DeleteUnsupported { .. })
    ));
}

use super::*;
use crate::store::memory::MemoryStore;
use crate::test_helpers::seed_session;

#[tokio::test]
async fn join_creates_online_participant() {
    let store = MemoryStore::new();
    let session = seed_session(&store, "ABC123").await;
    let ann = join(&store, session.id, " Ann ").await.unwrap();
    assert_eq!(ann.name, "Ann");
    assert!(ann.is_online);
    assert_eq!(online_count(&store, session.id).await.unwrap(), 1);
}

#[tokio::test]
async fn join_rejects_blank_name() {
    let store = MemoryStore::new();
    assert!(matches!(join(&store, Uuid::new_v4(), "").await, Err(SyncError::Validation(_))));
}

#[tokio::test]
async fn restore_brings_participant_back_online() {
    let store = MemoryStore::new();
    let session = seed_session(&store, "ABC123").await;
    let ann = join(&store, session.id, "Ann").await.unwrap();
    mark_offline(&store, ann.id).await.unwrap();
    assert_eq!(online_count(&store, session.id).await.unwrap(), 0);

    let restored = restore(&store, session.id, ann.id).await.unwrap().unwrap();
    assert_eq!(restored.id, ann.id);
    assert!(restored.is_online);
    assert_eq!(list_participants(&store, session.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn restore_unknown_or_foreign_id_is_none() {
    let store = MemoryStore::new();
    let session = seed_session(&store, "ABC123").await;
    let other = seed_session(&store, "ZZZ999").await;
    let eve = join(&store, other.id, "Eve").await.unwrap();

    assert!(restore(&store, session.id, Uuid::new_v4()).await.unwrap().is_none());
    assert!(restore(&store, session.id, eve.id).await.unwrap().is_none());
}

#[tokio::test]
async fn restore_propagates_store_failure() {
    let store = MemoryStore::new();
    store.set_fetch_failing(ResourceKind::Participants, true);
    let err = restore(&store, Uuid::new_v4(), Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, SyncError::Store(StoreError::Request(_))));
}

#[tokio::test]
async fn touch_last_seen_moves_forward() {
    let store = MemoryStore::new();
    let session = seed_session(&store, "ABC123").await;
    let ann = join(&store, session.id, "Ann").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    touch_last_seen(&store, ann.id).await.unwrap();
    let after = list_participants(&store, session.id).await.unwrap().remove(0);
    assert!(after.last_seen > ann.last_seen);
}

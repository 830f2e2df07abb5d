use super::*;
use crate::store::memory::MemoryStore;
use crate::test_helpers::{seed_participant, seed_progress, seed_session};

#[tokio::test]
async fn add_task_appends_after_max_order() {
    let store = MemoryStore::new();
    let session = seed_session(&store, "ABC123").await;

    let first = add_task(&store, session.id, "Install rustup").await.unwrap();
    let second = add_task(&store, session.id, "cargo new").await.unwrap();
    assert_eq!(first.order_index, 0);
    assert_eq!(second.order_index, 1);

    delete_task(&store, first.id).await.unwrap();
    let third = add_task(&store, session.id, "cargo run").await.unwrap();
    assert_eq!(third.order_index, 2, "gaps are kept, new tasks go after the max");
}

#[tokio::test]
async fn add_task_rejects_blank_title() {
    let store = MemoryStore::new();
    let err = add_task(&store, Uuid::new_v4(), "\t").await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    assert_eq!(store.total_fetches(), 0);
}

#[tokio::test]
async fn rename_task_keeps_order() {
    let store = MemoryStore::new();
    let session = seed_session(&store, "ABC123").await;
    let task = add_task(&store, session.id, "old").await.unwrap();
    let renamed = rename_task(&store, task.id, " new ").await.unwrap();
    assert_eq!(renamed.title, "new");
    assert_eq!(renamed.order_index, task.order_index);
}

#[tokio::test]
async fn delete_task_removes_its_progress() {
    let store = MemoryStore::new();
    let session = seed_session(&store, "ABC123").await;
    let task = add_task(&store, session.id, "t").await.unwrap();
    let ann = seed_participant(&store, session.id, "ann").await;
    seed_progress(&store, ann.id, task.id, true).await;

    delete_task(&store, task.id).await.unwrap();
    assert!(list_tasks(&store, session.id).await.unwrap().is_empty());
    assert!(store.rows(ResourceKind::Progress).is_empty());
}

use super::*;
use crate::error::ErrorCode;
use crate::store::patch;
use serde_json::json;

async fn seed_session(store: &MemoryStore, code: &str) -> String {
    let row = store
        .insert(ResourceKind::Sessions, patch([("code", json!(code)), ("title", json!("Workshop"))]))
        .await
        .unwrap();
    row["id"].as_str().unwrap().to_owned()
}

fn drain(sub: &mut Subscription) -> Vec<StoreEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = sub.events.try_recv() {
        out.push(ev);
    }
    out
}

// =============================================================================
// CRUD
// =============================================================================

#[tokio::test]
async fn insert_assigns_id_and_defaults() {
    let store = MemoryStore::new();
    let row = store
        .insert(ResourceKind::Sessions, patch([("code", json!("ABC123")), ("title", json!("Intro"))]))
        .await
        .unwrap();
    assert!(Uuid::parse_str(row["id"].as_str().unwrap()).is_ok());
    assert_eq!(row["active"], json!(true));
    let session: crate::model::Session = crate::store::from_row(row).unwrap();
    assert_eq!(session.code, "ABC123");
}

#[tokio::test]
async fn insert_rejects_unknown_column() {
    let store = MemoryStore::new();
    let err = store.insert(ResourceKind::Tasks, patch([("colour", json!("red"))])).await.unwrap_err();
    assert!(matches!(err, StoreError::UnknownColumn { .. }));
}

#[tokio::test]
async fn unique_key_conflicts() {
    let store = MemoryStore::new();
    seed_session(&store, "ABC123").await;
    let err = store
        .insert(ResourceKind::Sessions, patch([("code", json!("ABC123")), ("title", json!("Again"))]))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[tokio::test]
async fn update_merges_patch_and_keeps_id() {
    let store = MemoryStore::new();
    let sid = seed_session(&store, "ABC123").await;
    let id = Uuid::parse_str(&sid).unwrap();
    let row = store
        .update(ResourceKind::Sessions, id, patch([("title", json!("Renamed")), ("id", json!("nope"))]))
        .await
        .unwrap();
    assert_eq!(row["title"], json!("Renamed"));
    assert_eq!(row["id"], json!(sid));
    assert_eq!(row["code"], json!("ABC123"));
}

#[tokio::test]
async fn update_missing_row_is_not_found() {
    let store = MemoryStore::new();
    let err = store.update(ResourceKind::Tasks, Uuid::new_v4(), Row::new()).await.unwrap_err();
    assert!(matches!(err, StoreError::RowNotFound { .. }));
}

#[tokio::test]
async fn fetch_filters_and_orders() {
    let store = MemoryStore::new();
    let sid = seed_session(&store, "ABC123").await;
    for (title, idx) in [("b", 1), ("a", 0), ("c", 2)] {
        store
            .insert(
                ResourceKind::Tasks,
                patch([("session_id", json!(sid)), ("title", json!(title)), ("order_index", json!(idx))]),
            )
            .await
            .unwrap();
    }
    store
        .insert(
            ResourceKind::Tasks,
            patch([("session_id", json!("other")), ("title", json!("x")), ("order_index", json!(0))]),
        )
        .await
        .unwrap();

    let rows = store
        .fetch(ResourceKind::Tasks, &Filter::new().eq("session_id", sid.as_str()).order_by("order_index"))
        .await
        .unwrap();
    let titles: Vec<_> = rows.iter().map(|r| r["title"].as_str().unwrap()).collect();
    assert_eq!(titles, vec!["a", "b", "c"]);
    assert_eq!(store.fetch_count(ResourceKind::Tasks), 1);
}

#[tokio::test]
async fn delete_session_cascades() {
    let store = MemoryStore::new();
    let sid = seed_session(&store, "ABC123").await;
    let task = store
        .insert(ResourceKind::Tasks, patch([("session_id", json!(sid)), ("title", json!("t")), ("order_index", json!(0))]))
        .await
        .unwrap();
    let participant = store
        .insert(ResourceKind::Participants, patch([("session_id", json!(sid)), ("name", json!("ann"))]))
        .await
        .unwrap();
    store
        .insert(
            ResourceKind::Progress,
            patch([("participant_id", participant["id"].clone()), ("task_id", task["id"].clone())]),
        )
        .await
        .unwrap();

    store.delete(ResourceKind::Sessions, Uuid::parse_str(&sid).unwrap()).await.unwrap();
    for kind in ResourceKind::ALL {
        assert!(store.rows(kind).is_empty(), "{kind} should be empty");
    }
}

#[tokio::test]
async fn delete_where_requires_filter() {
    let store = MemoryStore::new();
    let err = store.delete_where(ResourceKind::Progress, &Filter::new()).await.unwrap_err();
    assert!(matches!(err, StoreError::UnfilteredDelete(ResourceKind::Progress)));
}

#[tokio::test]
async fn injected_failures_surface_as_request_errors() {
    let store = MemoryStore::new();
    store.set_fetch_failing(ResourceKind::Tasks, true);
    assert!(matches!(store.fetch(ResourceKind::Tasks, &Filter::new()).await, Err(StoreError::Request(_))));
    store.set_fetch_failing(ResourceKind::Tasks, false);
    assert!(store.fetch(ResourceKind::Tasks, &Filter::new()).await.is_ok());

    store.set_writes_failing(true);
    let err = store.insert(ResourceKind::Sessions, Row::new()).await.unwrap_err();
    assert!(err.retryable());
}

// =============================================================================
// Push channels
// =============================================================================

#[tokio::test]
async fn subscribe_acknowledges_and_delivers_matching_changes() {
    let store = MemoryStore::new();
    let sid = seed_session(&store, "ABC123").await;
    let mut sub = store
        .subscribe(ResourceKind::Tasks, &Filter::new().eq("session_id", sid.as_str()), "tasks_a")
        .await
        .unwrap();
    assert_eq!(
        drain(&mut sub),
        vec![StoreEvent::Status(StoreStatus::Connecting), StoreEvent::Status(StoreStatus::Subscribed)]
    );

    store
        .insert(ResourceKind::Tasks, patch([("session_id", json!(sid)), ("title", json!("t")), ("order_index", json!(0))]))
        .await
        .unwrap();
    store
        .insert(
            ResourceKind::Tasks,
            patch([("session_id", json!("elsewhere")), ("title", json!("t")), ("order_index", json!(0))]),
        )
        .await
        .unwrap();

    assert_eq!(drain(&mut sub), vec![StoreEvent::Change { kind: ResourceKind::Tasks, event: ChangeType::Insert }]);
}

#[tokio::test]
async fn channel_names_must_be_unique() {
    let store = MemoryStore::new();
    let _sub = store.subscribe(ResourceKind::Tasks, &Filter::new(), "tasks_x").await.unwrap();
    let err = store.subscribe(ResourceKind::Tasks, &Filter::new(), "tasks_x").await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateChannel(_)));
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let store = MemoryStore::new();
    let sub = store.subscribe(ResourceKind::Sessions, &Filter::new(), "s").await.unwrap();
    assert_eq!(store.active_subscriptions(), 1);
    store.unsubscribe(sub.id).await.unwrap();
    assert_eq!(store.active_subscriptions(), 0);
    store.unsubscribe(sub.id).await.unwrap();
}

#[tokio::test]
async fn subscribe_modes_report_failures() {
    let store = MemoryStore::new();
    store.set_subscribe_mode(ResourceKind::Progress, SubscribeMode::Fail);
    let mut sub = store.subscribe(ResourceKind::Progress, &Filter::new(), "p1").await.unwrap();
    assert_eq!(drain(&mut sub).last(), Some(&StoreEvent::Status(StoreStatus::ChannelError)));

    store.set_subscribe_mode(ResourceKind::Progress, SubscribeMode::Silent);
    let mut sub = store.subscribe(ResourceKind::Progress, &Filter::new(), "p2").await.unwrap();
    assert_eq!(drain(&mut sub), vec![StoreEvent::Status(StoreStatus::Connecting)]);

    store.set_subscribe_mode(ResourceKind::Progress, SubscribeMode::Reject);
    assert!(store.subscribe(ResourceKind::Progress, &Filter::new(), "p3").await.is_err());
    assert_eq!(store.subscribe_attempts(ResourceKind::Progress).len(), 3);
}

#[tokio::test]
async fn muted_push_still_reports_breaks() {
    let store = MemoryStore::new();
    let mut sub = store.subscribe(ResourceKind::Sessions, &Filter::new(), "s").await.unwrap();
    drain(&mut sub);
    store.set_push_muted(ResourceKind::Sessions, true);
    seed_session(&store, "ABC123").await;
    assert!(drain(&mut sub).is_empty());

    store.break_channels(ResourceKind::Sessions);
    assert_eq!(drain(&mut sub), vec![StoreEvent::Status(StoreStatus::ChannelError)]);
}

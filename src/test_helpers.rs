//! Shared fixtures for unit tests.

use serde_json::json;
use time::macros::datetime;
use uuid::Uuid;

use crate::model::{Participant, ProgressRecord, ResourceKind, Session, Task};
use crate::store::memory::MemoryStore;
use crate::store::{RemoteStore, from_row, patch};

#[must_use]
pub fn sample_session(code: &str) -> Session {
    Session {
        id: Uuid::new_v4(),
        code: code.to_owned(),
        title: "Intro to Rust".into(),
        created_at: datetime!(2025-01-01 09:00 UTC),
        active: true,
    }
}

#[must_use]
pub fn sample_task(session_id: Uuid, order_index: i32) -> Task {
    Task {
        id: Uuid::new_v4(),
        session_id,
        title: format!("step {order_index}"),
        order_index,
        created_at: datetime!(2025-01-01 09:00 UTC),
    }
}

#[must_use]
pub fn sample_participant(session_id: Uuid, name: &str) -> Participant {
    Participant {
        id: Uuid::new_v4(),
        session_id,
        name: name.to_owned(),
        last_seen: datetime!(2025-01-01 09:00 UTC),
        created_at: datetime!(2025-01-01 09:00 UTC),
        is_online: true,
    }
}

#[must_use]
pub fn sample_progress(participant_id: Uuid, task_id: Uuid, completed: bool) -> ProgressRecord {
    ProgressRecord {
        id: Uuid::new_v4(),
        participant_id,
        task_id,
        completed,
        updated_at: datetime!(2025-01-01 09:00 UTC),
    }
}

/// Insert an active session with a fixed code.
pub async fn seed_session(store: &MemoryStore, code: &str) -> Session {
    let row = store
        .insert(ResourceKind::Sessions, patch([("code", json!(code)), ("title", json!("Workshop"))]))
        .await
        .expect("seed session");
    from_row(row).expect("decode session")
}

/// Insert `count` tasks with order indexes `0..count`.
pub async fn seed_tasks(store: &MemoryStore, session_id: Uuid, count: i32) -> Vec<Task> {
    let mut tasks = Vec::new();
    for idx in 0..count {
        let row = store
            .insert(
                ResourceKind::Tasks,
                patch([
                    ("session_id", json!(session_id)),
                    ("title", json!(format!("step {idx}"))),
                    ("order_index", json!(idx)),
                ]),
            )
            .await
            .expect("seed task");
        tasks.push(from_row(row).expect("decode task"));
    }
    tasks
}

pub async fn seed_participant(store: &MemoryStore, session_id: Uuid, name: &str) -> Participant {
    let row = store
        .insert(ResourceKind::Participants, patch([("session_id", json!(session_id)), ("name", json!(name))]))
        .await
        .expect("seed participant");
    from_row(row).expect("decode participant")
}

pub async fn seed_progress(store: &MemoryStore, participant_id: Uuid, task_id: Uuid, completed: bool) -> ProgressRecord {
    let row = store
        .insert(
            ResourceKind::Progress,
            patch([
                ("participant_id", json!(participant_id)),
                ("task_id", json!(task_id)),
                ("completed", json!(completed)),
            ]),
        )
        .await
        .expect("seed progress");
    from_row(row).expect("decode progress")
}

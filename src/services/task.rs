//! Task list editing for the coordinator.

use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::error::{SyncError, require_text};
use crate::model::{ResourceKind, Task};
use crate::store::{Filter, RemoteStore, from_row, from_rows, patch};

/// Tasks of a session in display order.
///
/// # Errors
///
/// Returns `Store` when the read fails.
pub async fn list_tasks(store: &dyn RemoteStore, session_id: Uuid) -> Result<Vec<Task>, SyncError> {
    let filter = Filter::new().eq("session_id", session_id.to_string()).order_by("order_index");
    Ok(from_rows(store.fetch(ResourceKind::Tasks, &filter).await?)?)
}

/// Append a task after the current last one.
///
/// # Errors
///
/// Returns `Validation` for a blank title, or `Store` when a read or the
/// insert fails. Two concurrent appends may race for the same slot; the
/// loser gets `Store(Conflict)`.
pub async fn add_task(store: &dyn RemoteStore, session_id: Uuid, title: &str) -> Result<Task, SyncError> {
    let title = require_text("task title", title)?;
    let order_index = list_tasks(store, session_id).await?.iter().map(|t| t.order_index + 1).max().unwrap_or(0);
    let row = patch([("session_id", json!(session_id)), ("title", json!(title)), ("order_index", json!(order_index))]);
    let task: Task = from_row(store.insert(ResourceKind::Tasks, row).await?)?;
    info!(%session_id, task_id = %task.id, order_index, "task: added");
    Ok(task)
}

/// # Errors
///
/// Returns `Validation` for a blank title, or `Store` when the update fails.
pub async fn rename_task(store: &dyn RemoteStore, task_id: Uuid, title: &str) -> Result<Task, SyncError> {
    let title = require_text("task title", title)?;
    let row = store.update(ResourceKind::Tasks, task_id, patch([("title", json!(title))])).await?;
    Ok(from_row(row)?)
}

/// Delete a task; its progress records go with it.
///
/// # Errors
///
/// Returns `Store` when the delete fails.
pub async fn delete_task(store: &dyn RemoteStore, task_id: Uuid) -> Result<(), SyncError> {
    store.delete(ResourceKind::Tasks, task_id).await?;
    info!(%task_id, "task: deleted");
    Ok(())
}

#[cfg(test)]
#[path = "task_test.rs"]
mod tests;

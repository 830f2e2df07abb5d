//! Participant presence: joining, rejoining, heartbeat, disconnect.
//!
//! `is_online` is written on connect and disconnect; `last_seen` on every
//! heartbeat. Neither is derived from the other here.

use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{SyncError, require_text};
use crate::model::{Participant, ResourceKind, now};
use crate::store::{Filter, RemoteStore, StoreError, from_row, from_rows, patch, timestamp_value};

/// Create a new online participant.
///
/// # Errors
///
/// Returns `Validation` for a blank name, or `Store` when the insert fails.
pub async fn join(store: &dyn RemoteStore, session_id: Uuid, name: &str) -> Result<Participant, SyncError> {
    let name = require_text("participant name", name)?;
    let row = patch([
        ("session_id", json!(session_id)),
        ("name", json!(name)),
        ("is_online", json!(true)),
        ("last_seen", timestamp_value(now())),
    ]);
    let participant: Participant = from_row(store.insert(ResourceKind::Participants, row).await?)?;
    info!(%session_id, participant_id = %participant.id, name = %participant.name, "participant: joined");
    Ok(participant)
}

/// Bring a remembered participant back online. Returns `None` when the
/// participant no longer exists in this session.
///
/// # Errors
///
/// Returns `Store` when the lookup or the update fails.
pub async fn restore(
    store: &dyn RemoteStore,
    session_id: Uuid,
    participant_id: Uuid,
) -> Result<Option<Participant>, SyncError> {
    let filter = Filter::new().eq("id", participant_id.to_string()).eq("session_id", session_id.to_string());
    if store.fetch(ResourceKind::Participants, &filter).await?.is_empty() {
        return Ok(None);
    }
    let online = patch([("is_online", json!(true)), ("last_seen", timestamp_value(now()))]);
    match store.update(ResourceKind::Participants, participant_id, online).await {
        Ok(row) => {
            info!(%session_id, %participant_id, "participant: restored");
            Ok(Some(from_row(row)?))
        }
        Err(StoreError::RowNotFound { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Heartbeat write.
///
/// # Errors
///
/// Returns `Store` when the update fails.
pub async fn touch_last_seen(store: &dyn RemoteStore, participant_id: Uuid) -> Result<(), SyncError> {
    store
        .update(ResourceKind::Participants, participant_id, patch([("last_seen", timestamp_value(now()))]))
        .await?;
    debug!(%participant_id, "participant: last_seen updated");
    Ok(())
}

/// Disconnect write.
///
/// # Errors
///
/// Returns `Store` when the update fails.
pub async fn mark_offline(store: &dyn RemoteStore, participant_id: Uuid) -> Result<(), SyncError> {
    let row = patch([("is_online", json!(false)), ("last_seen", timestamp_value(now()))]);
    store.update(ResourceKind::Participants, participant_id, row).await?;
    info!(%participant_id, "participant: marked offline");
    Ok(())
}

/// Participants of a session in join order.
///
/// # Errors
///
/// Returns `Store` when the read fails.
pub async fn list_participants(store: &dyn RemoteStore, session_id: Uuid) -> Result<Vec<Participant>, SyncError> {
    let filter = Filter::new().eq("session_id", session_id.to_string()).order_by("created_at");
    Ok(from_rows(store.fetch(ResourceKind::Participants, &filter).await?)?)
}

/// Number of participants currently flagged online.
///
/// # Errors
///
/// Returns `Store` when the read fails.
pub async fn online_count(store: &dyn RemoteStore, session_id: Uuid) -> Result<usize, SyncError> {
    let filter = Filter::new().eq("session_id", session_id.to_string()).eq("is_online", true);
    Ok(store.fetch(ResourceKind::Participants, &filter).await?.len())
}

#[cfg(test)]
#[path = "participant_test.rs"]
mod tests;

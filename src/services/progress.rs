//! Progress records: toggling, bulk reset, and the coordinator's matrix.
//!
//! At most one record exists per (participant, task). Toggle looks for the
//! existing record first and flips it; it only inserts when none exists.
//! A concurrent insert that wins the race surfaces as a conflict, after
//! which the winner's record is flipped instead.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::SyncError;
use crate::model::{Participant, ProgressRecord, ResourceKind, Task, now};
use crate::store::{Filter, RemoteStore, StoreError, from_row, from_rows, patch, timestamp_value};

async fn find_record(
    store: &dyn RemoteStore,
    participant_id: Uuid,
    task_id: Uuid,
) -> Result<Option<ProgressRecord>, SyncError> {
    let filter =
        Filter::new().eq("participant_id", participant_id.to_string()).eq("task_id", task_id.to_string());
    Ok(from_rows::<ProgressRecord>(store.fetch(ResourceKind::Progress, &filter).await?)?.into_iter().next())
}

async fn flip(store: &dyn RemoteStore, record: &ProgressRecord) -> Result<ProgressRecord, SyncError> {
    let row = patch([("completed", json!(!record.completed)), ("updated_at", timestamp_value(now()))]);
    Ok(from_row(store.update(ResourceKind::Progress, record.id, row).await?)?)
}

/// Flip the completion of `task_id` for `participant_id`, creating the
/// record as completed when none exists.
///
/// # Errors
///
/// Returns `Store` when any read or write fails.
pub async fn toggle(store: &dyn RemoteStore, participant_id: Uuid, task_id: Uuid) -> Result<ProgressRecord, SyncError> {
    if let Some(existing) = find_record(store, participant_id, task_id).await? {
        let record = flip(store, &existing).await?;
        debug!(%participant_id, %task_id, completed = record.completed, "progress: toggled");
        return Ok(record);
    }

    let row = patch([
        ("participant_id", json!(participant_id)),
        ("task_id", json!(task_id)),
        ("completed", json!(true)),
        ("updated_at", timestamp_value(now())),
    ]);
    match store.insert(ResourceKind::Progress, row).await {
        Ok(row) => {
            debug!(%participant_id, %task_id, "progress: created");
            Ok(from_row(row)?)
        }
        Err(StoreError::Conflict(_)) => {
            let existing = find_record(store, participant_id, task_id)
                .await?
                .ok_or_else(|| SyncError::NotFound(format!("progress {participant_id}/{task_id}")))?;
            flip(store, &existing).await
        }
        Err(e) => Err(e.into()),
    }
}

/// Delete every progress record of a session's participants.
///
/// # Errors
///
/// Returns `Store` when the participant read or the delete fails.
pub async fn reset_session_progress(store: &dyn RemoteStore, session_id: Uuid) -> Result<u64, SyncError> {
    let participants = store
        .fetch(ResourceKind::Participants, &Filter::new().eq("session_id", session_id.to_string()))
        .await?;
    let ids: Vec<serde_json::Value> = participants.into_iter().filter_map(|mut row| row.remove("id")).collect();
    if ids.is_empty() {
        return Ok(0);
    }
    let removed = store.delete_where(ResourceKind::Progress, &Filter::new().is_in("participant_id", ids)).await?;
    info!(%session_id, removed, "progress: reset");
    Ok(removed)
}

// =============================================================================
// SUMMARY
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantProgress {
    pub participant_id: Uuid,
    pub name: String,
    pub completed: usize,
    pub total: usize,
}

impl ParticipantProgress {
    /// `completed/total`, as shown in the coordinator's table.
    #[must_use]
    pub fn ratio(&self) -> String {
        format!("{}/{}", self.completed, self.total)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskCompletion {
    pub task_id: Uuid,
    pub title: String,
    pub completed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ProgressSummary {
    pub participants: Vec<ParticipantProgress>,
    pub tasks: Vec<TaskCompletion>,
    /// (participant, task) pairs currently completed.
    #[serde(skip)]
    pub done: HashSet<(Uuid, Uuid)>,
}

impl ProgressSummary {
    #[must_use]
    pub fn is_done(&self, participant_id: Uuid, task_id: Uuid) -> bool {
        self.done.contains(&(participant_id, task_id))
    }
}

/// Build the per-participant and per-task completion counts. Records for
/// tasks or participants outside the given lists are ignored.
#[must_use]
pub fn summarize(tasks: &[Task], participants: &[Participant], progress: &[ProgressRecord]) -> ProgressSummary {
    let task_ids: HashSet<Uuid> = tasks.iter().map(|t| t.id).collect();
    let participant_ids: HashSet<Uuid> = participants.iter().map(|p| p.id).collect();
    let done: HashSet<(Uuid, Uuid)> = progress
        .iter()
        .filter(|r| r.completed && task_ids.contains(&r.task_id) && participant_ids.contains(&r.participant_id))
        .map(|r| (r.participant_id, r.task_id))
        .collect();

    let mut per_participant: HashMap<Uuid, usize> = HashMap::new();
    let mut per_task: HashMap<Uuid, usize> = HashMap::new();
    for (participant_id, task_id) in &done {
        *per_participant.entry(*participant_id).or_default() += 1;
        *per_task.entry(*task_id).or_default() += 1;
    }

    ProgressSummary {
        participants: participants
            .iter()
            .map(|p| ParticipantProgress {
                participant_id: p.id,
                name: p.name.clone(),
                completed: per_participant.get(&p.id).copied().unwrap_or_default(),
                total: tasks.len(),
            })
            .collect(),
        tasks: tasks
            .iter()
            .map(|t| TaskCompletion {
                task_id: t.id,
                title: t.title.clone(),
                completed: per_task.get(&t.id).copied().unwrap_or_default(),
            })
            .collect(),
        done,
    }
}

#[cfg(test)]
#[path = "progress_test.rs"]
mod tests;

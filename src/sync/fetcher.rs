//! Fetcher: authoritative per-resource snapshot reads for one session.
//!
//! The scope decides what each resource means for the viewer. A
//! coordinator sees every participant and all of their progress; a
//! participant sees the online roster and only their own progress.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use super::projection::Snapshot;
use crate::error::SyncError;
use crate::model::{Participant, ResourceKind, Session};
use crate::store::{Filter, RemoteStore, from_rows};

/// How a caller attaches to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Coordinator,
    /// `name` is required only when no remembered identity exists.
    Participant { name: Option<String> },
}

/// Who is looking at the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Viewer {
    Coordinator,
    Participant(Participant),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionScope {
    pub session: Session,
    pub viewer: Viewer,
}

impl SessionScope {
    #[must_use]
    pub fn participant_id(&self) -> Option<Uuid> {
        match &self.viewer {
            Viewer::Participant(p) => Some(p.id),
            Viewer::Coordinator => None,
        }
    }

    #[must_use]
    pub fn is_coordinator(&self) -> bool {
        matches!(self.viewer, Viewer::Coordinator)
    }

    /// Push filter for `kind`. The coordinator's progress channel is scoped
    /// to the participants known at open time.
    #[must_use]
    pub fn channel_filter(&self, kind: ResourceKind, participant_ids: &[Uuid]) -> Filter {
        let session_id = self.session.id.to_string();
        match (kind, &self.viewer) {
            (ResourceKind::Sessions, _) => Filter::new().eq("id", session_id),
            (ResourceKind::Tasks | ResourceKind::Participants, _) => Filter::new().eq("session_id", session_id),
            (ResourceKind::Progress, Viewer::Participant(p)) => Filter::new().eq("participant_id", p.id.to_string()),
            (ResourceKind::Progress, Viewer::Coordinator) => {
                Filter::new().is_in("participant_id", participant_ids.iter().map(Uuid::to_string))
            }
        }
    }

    /// Resources to re-fetch when `kind` changed.
    #[must_use]
    pub fn refresh_plan(&self, kind: ResourceKind) -> Vec<ResourceKind> {
        match (kind, &self.viewer) {
            (ResourceKind::Participants, Viewer::Coordinator) => {
                vec![ResourceKind::Participants, ResourceKind::Progress]
            }
            _ => vec![kind],
        }
    }
}

#[derive(Clone)]
pub struct Fetcher {
    store: Arc<dyn RemoteStore>,
    scope: Arc<SessionScope>,
}

impl Fetcher {
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>, scope: Arc<SessionScope>) -> Self {
        Self { store, scope }
    }

    #[must_use]
    pub fn scope(&self) -> &SessionScope {
        &self.scope
    }

    /// Read the current authoritative state of `kind`.
    ///
    /// # Errors
    ///
    /// Returns `Store` when the read fails or a row does not decode.
    pub async fn fetch(&self, kind: ResourceKind) -> Result<Snapshot, SyncError> {
        let session_id = self.scope.session.id.to_string();
        let snapshot = match kind {
            ResourceKind::Sessions => {
                let rows = self.store.fetch(kind, &Filter::new().eq("id", session_id)).await?;
                Snapshot::Sessions(from_rows(rows)?)
            }
            ResourceKind::Tasks => {
                let filter = Filter::new().eq("session_id", session_id).order_by("order_index");
                Snapshot::Tasks(from_rows(self.store.fetch(kind, &filter).await?)?)
            }
            ResourceKind::Participants => {
                let mut filter = Filter::new().eq("session_id", session_id);
                if !self.scope.is_coordinator() {
                    filter = filter.eq("is_online", true);
                }
                Snapshot::Participants(from_rows(self.store.fetch(kind, &filter.order_by("created_at")).await?)?)
            }
            ResourceKind::Progress => {
                let filter = match self.scope.participant_id() {
                    Some(id) => Filter::new().eq("participant_id", id.to_string()),
                    None => {
                        let ids = self.session_participant_ids().await?;
                        Filter::new().is_in("participant_id", ids)
                    }
                };
                Snapshot::Progress(from_rows(self.store.fetch(kind, &filter).await?)?)
            }
        };
        Ok(snapshot)
    }

    async fn session_participant_ids(&self) -> Result<Vec<Value>, SyncError> {
        let filter = Filter::new().eq("session_id", self.scope.session.id.to_string());
        let rows = self.store.fetch(ResourceKind::Participants, &filter).await?;
        Ok(rows.into_iter().filter_map(|mut row| row.remove("id")).collect())
    }
}

#[cfg(test)]
#[path = "fetcher_test.rs"]
mod tests;

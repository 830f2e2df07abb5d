//! Projection store: the local read model of one attached session.
//!
//! DESIGN
//! ======
//! One slice per resource kind, each replaced wholesale by the latest
//! authoritative fetch. There is no partial merge and nothing is derived
//! here. Reads are synchronous and return owned copies.
//!
//! Every write carries the attachment generation it was fetched under.
//! `begin_generation` clears the slices and advances the counter, so a
//! fetch that completes after a detach or a session switch is discarded
//! instead of leaking the old session's rows into the new one.
//!
//! Listeners run synchronously after the write, outside the slice lock.
//! Writes and their notifications are serialized, so listeners never see a
//! superseded generation after the slices were emptied. A listener must not
//! write to the projection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use crate::model::{Participant, ProgressRecord, ResourceKind, Session, Task};

/// One resource slice, as handed to readers and listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    Sessions(Vec<Session>),
    Tasks(Vec<Task>),
    Participants(Vec<Participant>),
    Progress(Vec<ProgressRecord>),
}

impl Snapshot {
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Sessions(_) => ResourceKind::Sessions,
            Self::Tasks(_) => ResourceKind::Tasks,
            Self::Participants(_) => ResourceKind::Participants,
            Self::Progress(_) => ResourceKind::Progress,
        }
    }

    #[must_use]
    pub fn empty(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Sessions => Self::Sessions(Vec::new()),
            ResourceKind::Tasks => Self::Tasks(Vec::new()),
            ResourceKind::Participants => Self::Participants(Vec::new()),
            ResourceKind::Progress => Self::Progress(Vec::new()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Sessions(v) => v.len(),
            Self::Tasks(v) => v.len(),
            Self::Participants(v) => v.len(),
            Self::Progress(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type Listener = Arc<dyn Fn(&Snapshot) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Slices {
    sessions: HashMap<Uuid, Session>,
    tasks: HashMap<Uuid, Task>,
    participants: HashMap<Uuid, Participant>,
    progress: HashMap<Uuid, ProgressRecord>,
}

impl Slices {
    fn replace(&mut self, snapshot: Snapshot) {
        match snapshot {
            Snapshot::Sessions(rows) => self.sessions = rows.into_iter().map(|r| (r.id, r)).collect(),
            Snapshot::Tasks(rows) => self.tasks = rows.into_iter().map(|r| (r.id, r)).collect(),
            Snapshot::Participants(rows) => self.participants = rows.into_iter().map(|r| (r.id, r)).collect(),
            Snapshot::Progress(rows) => self.progress = rows.into_iter().map(|r| (r.id, r)).collect(),
        }
    }

    /// Stable view ordering: tasks by `order_index`, people by join time,
    /// sessions newest first, progress by (participant, task).
    fn read(&self, kind: ResourceKind) -> Snapshot {
        match kind {
            ResourceKind::Sessions => {
                let mut rows: Vec<Session> = self.sessions.values().cloned().collect();
                rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
                Snapshot::Sessions(rows)
            }
            ResourceKind::Tasks => {
                let mut rows: Vec<Task> = self.tasks.values().cloned().collect();
                rows.sort_by_key(|t| (t.order_index, t.id));
                Snapshot::Tasks(rows)
            }
            ResourceKind::Participants => {
                let mut rows: Vec<Participant> = self.participants.values().cloned().collect();
                rows.sort_by_key(|p| (p.created_at, p.id));
                Snapshot::Participants(rows)
            }
            ResourceKind::Progress => {
                let mut rows: Vec<ProgressRecord> = self.progress.values().cloned().collect();
                rows.sort_by_key(|r| (r.participant_id, r.task_id));
                Snapshot::Progress(rows)
            }
        }
    }
}

#[derive(Default)]
pub struct ProjectionStore {
    slices: RwLock<Slices>,
    generation: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, ResourceKind, Listener)>>,
    next_listener: AtomicU64,
    writes: Mutex<()>,
}

impl ProjectionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read_slices(&self) -> RwLockReadGuard<'_, Slices> {
        self.slices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slices(&self) -> RwLockWriteGuard<'_, Slices> {
        self.slices.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn serialize_writes(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    /// Drop every slice and start a new generation. Listeners see the
    /// emptied slices. Returns the new generation.
    pub fn begin_generation(&self) -> u64 {
        let _writes = self.serialize_writes();
        let generation = {
            let mut slices = self.write_slices();
            *slices = Slices::default();
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        for kind in ResourceKind::ALL {
            self.notify(&Snapshot::empty(kind));
        }
        generation
    }

    /// Replace one slice. Returns false and leaves the projection untouched
    /// when `generation` is stale.
    pub fn apply(&self, generation: u64, snapshot: Snapshot) -> bool {
        let kind = snapshot.kind();
        let _writes = self.serialize_writes();
        let view = {
            let mut slices = self.write_slices();
            if !self.is_current(generation) {
                return false;
            }
            slices.replace(snapshot);
            slices.read(kind)
        };
        self.notify(&view);
        true
    }

    #[must_use]
    pub fn snapshot(&self, kind: ResourceKind) -> Snapshot {
        self.read_slices().read(kind)
    }

    #[must_use]
    pub fn sessions(&self) -> Vec<Session> {
        match self.snapshot(ResourceKind::Sessions) {
            Snapshot::Sessions(rows) => rows,
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        match self.snapshot(ResourceKind::Tasks) {
            Snapshot::Tasks(rows) => rows,
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn participants(&self) -> Vec<Participant> {
        match self.snapshot(ResourceKind::Participants) {
            Snapshot::Participants(rows) => rows,
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn progress(&self) -> Vec<ProgressRecord> {
        match self.snapshot(ResourceKind::Progress) {
            Snapshot::Progress(rows) => rows,
            _ => Vec::new(),
        }
    }

    /// Register `listener` for every replacement of `kind`.
    pub fn on_changed(&self, kind: ResourceKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().unwrap_or_else(PoisonError::into_inner).push((id, kind, listener));
        id
    }

    /// Returns whether the listener was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(lid, _, _)| *lid != id);
        listeners.len() != before
    }

    fn notify(&self, snapshot: &Snapshot) {
        let kind = snapshot.kind();
        let targets: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, l)| Arc::clone(l))
            .collect();
        for listener in targets {
            listener(snapshot);
        }
    }
}

#[cfg(test)]
#[path = "projection_test.rs"]
mod tests;

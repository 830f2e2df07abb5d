//! In-process store backend.
//!
//! DESIGN
//! ======
//! Mirrors the Postgres backend's observable behavior: generated ids and
//! timestamps, unique keys, cascading deletes, and per-table push channels
//! that deliver a change notice to every subscriber whose filter matches the
//! affected row.
//!
//! Fault injection knobs make the degraded paths reachable from tests:
//! subscriptions can be refused, time out, or
//! stay silent; live channels can be broken; push delivery can be muted;
//! fetches and writes can fail.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use super::{
    ChangeType, Filter, RemoteStore, Row, StoreError, StoreEvent, StoreStatus, Subscription, SubscriptionId,
    timestamp_value,
};
use crate::model::ResourceKind;

/// How the store answers new subscriptions for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscribeMode {
    /// Report `Subscribed` immediately.
    #[default]
    Acknowledge,
    /// Report `ChannelError` immediately.
    Fail,
    /// Report `TimedOut` immediately.
    TimeOut,
    /// Never report a status.
    Silent,
    /// Fail the subscribe request itself.
    Reject,
}

struct Subscriber {
    id: SubscriptionId,
    kind: ResourceKind,
    filter: Filter,
    name: String,
    tx: mpsc::UnboundedSender<StoreEvent>,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<ResourceKind, Vec<Row>>,
    subscribers: Vec<Subscriber>,
    modes: HashMap<ResourceKind, SubscribeMode>,
    muted: HashSet<ResourceKind>,
    failing_fetches: HashSet<ResourceKind>,
    failing_writes: bool,
    fetch_counts: HashMap<ResourceKind, usize>,
    subscribe_log: Vec<(ResourceKind, Instant)>,
}

impl Inner {
    fn rows(&mut self, kind: ResourceKind) -> &mut Vec<Row> {
        self.tables.entry(kind).or_default()
    }

    fn notify(&self, kind: ResourceKind, event: ChangeType, row: &Row) {
        if self.muted.contains(&kind) {
            return;
        }
        for sub in self.subscribers.iter().filter(|s| s.kind == kind && s.filter.matches(row)) {
            let _ = sub.tx.send(StoreEvent::Change { kind, event });
        }
    }

    fn check_unique(&self, kind: ResourceKind, candidate: &Row, skip_id: Option<&Value>) -> Result<(), StoreError> {
        let Some(rows) = self.tables.get(&kind) else {
            return Ok(());
        };
        for key in kind.unique_keys() {
            let clash = rows.iter().filter(|r| skip_id.is_none_or(|id| r.get("id") != Some(id))).any(|existing| {
                key.iter().all(|col| candidate.get(*col).is_some_and(|v| existing.get(*col) == Some(v)))
            });
            if clash {
                return Err(StoreError::Conflict(format!("duplicate {kind} ({})", key.join(", "))));
            }
        }
        Ok(())
    }

    /// Remove matching rows, cascading to dependent tables, notifying as rows go.
    fn remove_where(&mut self, kind: ResourceKind, filter: &Filter) -> u64 {
        let rows = self.rows(kind);
        let (gone, kept): (Vec<Row>, Vec<Row>) = std::mem::take(rows).into_iter().partition(|r| filter.matches(r));
        *rows = kept;
        for row in &gone {
            self.notify(kind, ChangeType::Delete, row);
            let Some(id) = row.get("id").cloned() else { continue };
            for (child, column) in cascade_targets(kind) {
                self.remove_where(*child, &Filter::new().eq(column, id.clone()));
            }
        }
        gone.len() as u64
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.failing_writes {
            return Err(StoreError::Request("injected write failure".into()));
        }
        Ok(())
    }
}

/// Child tables removed along with a parent row, keyed by foreign column.
fn cascade_targets(kind: ResourceKind) -> &'static [(ResourceKind, &'static str)] {
    match kind {
        ResourceKind::Sessions => &[(ResourceKind::Tasks, "session_id"), (ResourceKind::Participants, "session_id")],
        ResourceKind::Tasks => &[(ResourceKind::Progress, "task_id")],
        ResourceKind::Participants => &[(ResourceKind::Progress, "participant_id")],
        ResourceKind::Progress => &[],
    }
}

/// Column defaults applied on insert when the caller leaves them out.
fn apply_defaults(kind: ResourceKind, row: &mut Row) {
    row.entry("id").or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
    let now = timestamp_value(crate::model::now());
    let defaults = match kind {
        ResourceKind::Sessions => vec![("created_at", now), ("active", Value::Bool(true))],
        ResourceKind::Tasks => vec![("created_at", now)],
        ResourceKind::Participants => {
            vec![("created_at", now.clone()), ("last_seen", now), ("is_online", Value::Bool(true))]
        }
        ResourceKind::Progress => vec![("updated_at", now), ("completed", Value::Bool(false))],
    };
    for (column, value) in defaults {
        row.entry(column).or_insert(value);
    }
}

fn validate_columns(kind: ResourceKind, row: &Row) -> Result<(), StoreError> {
    match row.keys().find(|c| !kind.has_column(c)) {
        Some(column) => Err(StoreError::UnknownColumn { kind, column: column.clone() }),
        None => Ok(()),
    }
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_subscribe_mode(&self, kind: ResourceKind, mode: SubscribeMode) {
        self.lock().modes.insert(kind, mode);
    }

    /// Report `ChannelError` on every live subscription of `kind`.
    pub fn break_channels(&self, kind: ResourceKind) {
        let inner = self.lock();
        for sub in inner.subscribers.iter().filter(|s| s.kind == kind) {
            let _ = sub.tx.send(StoreEvent::Status(StoreStatus::ChannelError));
        }
    }

    /// Stop (or resume) delivering change notices for `kind`. Status still flows.
    pub fn set_push_muted(&self, kind: ResourceKind, muted: bool) {
        let mut inner = self.lock();
        if muted {
            inner.muted.insert(kind);
        } else {
            inner.muted.remove(&kind);
        }
    }

    pub fn set_fetch_failing(&self, kind: ResourceKind, failing: bool) {
        let mut inner = self.lock();
        if failing {
            inner.failing_fetches.insert(kind);
        } else {
            inner.failing_fetches.remove(&kind);
        }
    }

    pub fn set_writes_failing(&self, failing: bool) {
        self.lock().failing_writes = failing;
    }

    /// Number of fetches served for `kind`, including failed ones.
    #[must_use]
    pub fn fetch_count(&self, kind: ResourceKind) -> usize {
        self.lock().fetch_counts.get(&kind).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn total_fetches(&self) -> usize {
        self.lock().fetch_counts.values().sum()
    }

    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.lock().subscribers.len()
    }

    #[must_use]
    pub fn subscription_names(&self) -> Vec<String> {
        self.lock().subscribers.iter().map(|s| s.name.clone()).collect()
    }

    /// Every subscribe attempt for `kind`, in order, stamped with tokio time.
    #[must_use]
    pub fn subscribe_attempts(&self, kind: ResourceKind) -> Vec<Instant> {
        self.lock().subscribe_log.iter().filter(|(k, _)| *k == kind).map(|(_, at)| *at).collect()
    }

    /// Raw table contents in insertion order.
    #[must_use]
    pub fn rows(&self, kind: ResourceKind) -> Vec<Row> {
        self.lock().tables.get(&kind).cloned().unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl RemoteStore for MemoryStore {
    async fn fetch(&self, kind: ResourceKind, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        filter.validate(kind)?;
        let mut inner = self.lock();
        *inner.fetch_counts.entry(kind).or_default() += 1;
        if inner.failing_fetches.contains(&kind) {
            return Err(StoreError::Request(format!("injected fetch failure on {kind}")));
        }
        let mut rows: Vec<Row> = inner.rows(kind).iter().filter(|r| filter.matches(r)).cloned().collect();
        filter.sort(&mut rows);
        Ok(rows)
    }

    async fn insert(&self, kind: ResourceKind, mut row: Row) -> Result<Row, StoreError> {
        validate_columns(kind, &row)?;
        let mut inner = self.lock();
        inner.check_writable()?;
        apply_defaults(kind, &mut row);
        inner.check_unique(kind, &row, None)?;
        inner.rows(kind).push(row.clone());
        inner.notify(kind, ChangeType::Insert, &row);
        Ok(row)
    }

    async fn update(&self, kind: ResourceKind, id: Uuid, patch: Row) -> Result<Row, StoreError> {
        validate_columns(kind, &patch)?;
        let mut inner = self.lock();
        inner.check_writable()?;
        let key = Value::String(id.to_string());
        let Some(pos) = inner.rows(kind).iter().position(|r| r.get("id") == Some(&key)) else {
            return Err(StoreError::RowNotFound { kind, id });
        };
        let mut updated = inner.rows(kind)[pos].clone();
        updated.extend(patch.into_iter().filter(|(column, _)| column != "id"));
        inner.check_unique(kind, &updated, Some(&key))?;
        inner.rows(kind)[pos] = updated.clone();
        inner.notify(kind, ChangeType::Update, &updated);
        Ok(updated)
    }

    async fn delete(&self, kind: ResourceKind, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.check_writable()?;
        match inner.remove_where(kind, &Filter::new().eq("id", id.to_string())) {
            0 => Err(StoreError::RowNotFound { kind, id }),
            _ => Ok(()),
        }
    }

    async fn delete_where(&self, kind: ResourceKind, filter: &Filter) -> Result<u64, StoreError> {
        if filter.is_unrestricted() {
            return Err(StoreError::UnfilteredDelete(kind));
        }
        filter.validate(kind)?;
        let mut inner = self.lock();
        inner.check_writable()?;
        Ok(inner.remove_where(kind, filter))
    }

    async fn subscribe(&self, kind: ResourceKind, filter: &Filter, name: &str) -> Result<Subscription, StoreError> {
        filter.validate(kind)?;
        let mut inner = self.lock();
        inner.subscribe_log.push((kind, Instant::now()));
        if inner.subscribers.iter().any(|s| s.name == name) {
            return Err(StoreError::DuplicateChannel(name.to_owned()));
        }
        let mode = inner.modes.get(&kind).copied().unwrap_or_default();
        if mode == SubscribeMode::Reject {
            return Err(StoreError::Request(format!("subscribe to {kind} refused")));
        }

        let (tx, events) = mpsc::unbounded_channel();
        let _ = tx.send(StoreEvent::Status(StoreStatus::Connecting));
        let reply = match mode {
            SubscribeMode::Acknowledge => Some(StoreStatus::Subscribed),
            SubscribeMode::Fail => Some(StoreStatus::ChannelError),
            SubscribeMode::TimeOut => Some(StoreStatus::TimedOut),
            SubscribeMode::Silent | SubscribeMode::Reject => None,
        };
        if let Some(status) = reply {
            let _ = tx.send(StoreEvent::Status(status));
        }

        let id = SubscriptionId::new();
        inner.subscribers.push(Subscriber { id, kind, filter: filter.clone(), name: name.to_owned(), tx });
        Ok(Subscription { id, events })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), StoreError> {
        self.lock().subscribers.retain(|s| s.id != id);
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;

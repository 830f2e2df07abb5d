//! Postgres store backend.
//!
//! DESIGN
//! ======
//! Rows are read and written as `jsonb` so the backend stays table-agnostic:
//! reads select `to_jsonb(t)`, writes go through `jsonb_populate_record`.
//! Column names are checked against [`ResourceKind::columns`] before they
//! are spliced into SQL; values are always bound.
//!
//! Push channels ride on LISTEN/NOTIFY. A trigger on every table publishes
//! `{table, type, record, old_record}` on [`CHANGE_CHANNEL`]; each
//! subscription owns one `PgListener` task that filters notices for its
//! table and forwards a change signal.
//!
//! ERROR HANDLING
//! ==============
//! Listener failures are reported as `ChannelError` status and end the
//! task. Re-subscribing is the caller's job.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use sqlx::postgres::PgListener;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    ChangeType, Clause, Filter, RemoteStore, Row, StoreError, StoreEvent, StoreStatus, Subscription, SubscriptionId,
};
use crate::model::ResourceKind;

/// NOTIFY channel the change trigger publishes on.
pub const CHANGE_CHANNEL: &str = "handson_changes";

/// One decoded change notice.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNotice {
    pub kind: ResourceKind,
    pub event: ChangeType,
    pub record: Option<Row>,
    pub old_record: Option<Row>,
}

impl ChangeNotice {
    /// True when either image of the row passes `filter`.
    #[must_use]
    pub fn matches(&self, filter: &Filter) -> bool {
        [&self.record, &self.old_record].into_iter().flatten().any(|row| filter.matches(row))
    }
}

#[derive(Deserialize)]
struct NoticePayload {
    table: String,
    #[serde(rename = "type")]
    op: String,
    record: Option<Row>,
    old_record: Option<Row>,
}

/// Decode a trigger payload. Notices for unknown tables or operations
/// decode to `None`.
///
/// # Errors
///
/// Returns `Decode` if the payload is not the trigger's JSON shape.
pub fn decode_notification(payload: &str) -> Result<Option<ChangeNotice>, StoreError> {
    let raw: NoticePayload = serde_json::from_str(payload)?;
    let (Some(kind), Some(event)) = (ResourceKind::from_table(&raw.table), ChangeType::from_op(&raw.op)) else {
        return Ok(None);
    };
    Ok(Some(ChangeNotice { kind, event, record: raw.record, old_record: raw.old_record }))
}

// =============================================================================
// SQL BUILDING
// =============================================================================

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    for clause in filter.clauses() {
        match clause {
            Clause::Eq { column, value } => {
                qb.push(" AND to_jsonb(t) -> ");
                qb.push_bind(column.clone());
                qb.push(" = ");
                qb.push_bind(Json(value.clone()));
            }
            Clause::In { values, .. } if values.is_empty() => {
                qb.push(" AND FALSE");
            }
            Clause::In { column, values } => {
                qb.push(" AND to_jsonb(t) -> ");
                qb.push_bind(column.clone());
                qb.push(" IN (");
                let mut list = qb.separated(", ");
                for value in values {
                    list.push_bind(Json(value.clone()));
                }
                list.push_unseparated(")");
            }
        }
    }
}

fn push_order(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    if let Some(order) = filter.order() {
        let dir = if order.descending { "DESC" } else { "ASC" };
        qb.push(format!(" ORDER BY t.{} {dir}", order.column));
    }
}

fn checked_columns(kind: ResourceKind, row: &Row) -> Result<String, StoreError> {
    let mut columns = Vec::with_capacity(row.len());
    for column in row.keys() {
        if !kind.has_column(column) {
            return Err(StoreError::UnknownColumn { kind, column: column.clone() });
        }
        columns.push(column.as_str());
    }
    Ok(columns.join(", "))
}

// =============================================================================
// STORE
// =============================================================================

struct ListenerHandle {
    name: String,
    task: JoinHandle<()>,
}

pub struct PgStore {
    pool: PgPool,
    listen_timeout: Duration,
    listeners: Mutex<HashMap<SubscriptionId, ListenerHandle>>,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool, listen_timeout: Duration) -> Self {
        Self { pool, listen_timeout, listeners: Mutex::new(HashMap::new()) }
    }

    fn listeners(&self) -> MutexGuard<'_, HashMap<SubscriptionId, ListenerHandle>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PgStore {
    fn drop(&mut self) {
        for (_, handle) in self.listeners().drain() {
            handle.task.abort();
        }
    }
}

#[async_trait::async_trait]
impl RemoteStore for PgStore {
    async fn fetch(&self, kind: ResourceKind, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        filter.validate(kind)?;
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT to_jsonb(t) FROM {} t WHERE TRUE", kind.table()));
        push_filter(&mut qb, filter);
        push_order(&mut qb, filter);
        let rows: Vec<Json<Row>> = qb.build_query_scalar().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|Json(row)| row).collect())
    }

    async fn insert(&self, kind: ResourceKind, row: Row) -> Result<Row, StoreError> {
        let table = kind.table();
        let Json(inserted): Json<Row> = if row.is_empty() {
            let sql = format!("INSERT INTO {table} AS t DEFAULT VALUES RETURNING to_jsonb(t.*)");
            sqlx::query_scalar(&sql).fetch_one(&self.pool).await?
        } else {
            let cols = checked_columns(kind, &row)?;
            let sql = format!(
                "INSERT INTO {table} AS t ({cols}) SELECT {cols} FROM jsonb_populate_record(NULL::{table}, $1) \
                 RETURNING to_jsonb(t.*)"
            );
            sqlx::query_scalar(&sql).bind(Json(row)).fetch_one(&self.pool).await?
        };
        debug!(%kind, "pg: row inserted");
        Ok(inserted)
    }

    async fn update(&self, kind: ResourceKind, id: Uuid, mut patch: Row) -> Result<Row, StoreError> {
        patch.remove("id");
        let table = kind.table();
        let updated: Option<Json<Row>> = if patch.is_empty() {
            let sql = format!("SELECT to_jsonb(t) FROM {table} t WHERE t.id = $1");
            sqlx::query_scalar(&sql).bind(id).fetch_optional(&self.pool).await?
        } else {
            let cols = checked_columns(kind, &patch)?;
            let sql = format!(
                "UPDATE {table} AS t SET ({cols}) = (SELECT {cols} FROM jsonb_populate_record(NULL::{table}, $1)) \
                 WHERE t.id = $2 RETURNING to_jsonb(t.*)"
            );
            sqlx::query_scalar(&sql).bind(Json(patch)).bind(id).fetch_optional(&self.pool).await?
        };
        updated.map(|Json(row)| row).ok_or(StoreError::RowNotFound { kind, id })
    }

    async fn delete(&self, kind: ResourceKind, id: Uuid) -> Result<(), StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = $1", kind.table());
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound { kind, id });
        }
        Ok(())
    }

    async fn delete_where(&self, kind: ResourceKind, filter: &Filter) -> Result<u64, StoreError> {
        if filter.is_unrestricted() {
            return Err(StoreError::UnfilteredDelete(kind));
        }
        filter.validate(kind)?;
        let mut qb = QueryBuilder::<Postgres>::new(format!("DELETE FROM {} AS t WHERE TRUE", kind.table()));
        push_filter(&mut qb, filter);
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn subscribe(&self, kind: ResourceKind, filter: &Filter, name: &str) -> Result<Subscription, StoreError> {
        filter.validate(kind)?;
        let mut listeners = self.listeners();
        listeners.retain(|_, handle| !handle.task.is_finished());
        if listeners.values().any(|handle| handle.name == name) {
            return Err(StoreError::DuplicateChannel(name.to_owned()));
        }

        let (tx, events) = mpsc::unbounded_channel();
        let _ = tx.send(StoreEvent::Status(StoreStatus::Connecting));
        let task = tokio::spawn(run_listener(self.pool.clone(), kind, filter.clone(), self.listen_timeout, tx));

        let id = SubscriptionId::new();
        listeners.insert(id, ListenerHandle { name: name.to_owned(), task });
        info!(%kind, channel = name, %filter, "pg: subscription opened");
        Ok(Subscription { id, events })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), StoreError> {
        if let Some(handle) = self.listeners().remove(&id) {
            handle.task.abort();
            info!(channel = %handle.name, "pg: subscription closed");
        }
        Ok(())
    }
}

async fn listen(pool: &PgPool) -> Result<PgListener, sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(CHANGE_CHANNEL).await?;
    Ok(listener)
}

/// Subscription task: connect, report status, forward matching notices.
async fn run_listener(
    pool: PgPool,
    kind: ResourceKind,
    filter: Filter,
    listen_timeout: Duration,
    tx: mpsc::UnboundedSender<StoreEvent>,
) {
    let mut listener = match tokio::time::timeout(listen_timeout, listen(&pool)).await {
        Ok(Ok(listener)) => listener,
        Ok(Err(e)) => {
            warn!(%kind, error = %e, "pg: listen failed");
            let _ = tx.send(StoreEvent::Status(StoreStatus::ChannelError));
            return;
        }
        Err(_) => {
            warn!(%kind, "pg: listen timed out");
            let _ = tx.send(StoreEvent::Status(StoreStatus::TimedOut));
            return;
        }
    };
    if tx.send(StoreEvent::Status(StoreStatus::Subscribed)).is_err() {
        return;
    }

    loop {
        let notification = match listener.try_recv().await {
            Ok(Some(notification)) => notification,
            Ok(None) => {
                warn!(%kind, "pg: listener connection lost");
                break;
            }
            Err(e) => {
                warn!(%kind, error = %e, "pg: listener failed");
                break;
            }
        };
        match decode_notification(notification.payload()) {
            Ok(Some(notice)) if notice.kind == kind && notice.matches(&filter) => {
                if tx.send(StoreEvent::Change { kind, event: notice.event }).is_err() {
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => warn!(%kind, error = %e, "pg: undecodable change notice"),
        }
    }
    let _ = tx.send(StoreEvent::Status(StoreStatus::ChannelError));
}

#[cfg(test)]
#[path = "postgres_test.rs"]
mod tests;

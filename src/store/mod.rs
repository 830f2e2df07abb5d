//! Remote data store boundary.
//!
//! ARCHITECTURE
//! ============
//! The store is the system of record. The sync core only sees it through
//! [`RemoteStore`]: pull reads, direct CRUD, and a best-effort push channel
//! per table. Rows cross the boundary as flat JSON objects so backends never
//! need to know the domain structs.
//!
//! Push payloads are not trusted. A [`StoreEvent::Change`] only names the
//! table and the kind of mutation; consumers re-fetch to learn the state.

mod filter;
pub mod memory;
pub mod postgres;

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::model::ResourceKind;

pub use filter::{Clause, Filter, Order};

// =============================================================================
// TYPES
// =============================================================================

/// Flat key-value row. Alias to reduce noise in signatures.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The request never produced an answer (network, pool, injected fault).
    #[error("request failed: {0}")]
    Request(String),
    #[error("{kind} row not found: {id}")]
    RowNotFound { kind: ResourceKind, id: Uuid },
    #[error("unknown column `{column}` for {kind}")]
    UnknownColumn { kind: ResourceKind, column: String },
    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("channel name already in use: {0}")]
    DuplicateChannel(String),
    #[error("refusing unfiltered delete on {0}")]
    UnfilteredDelete(ResourceKind),
    #[error("row decode failed: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::Conflict(db.message().to_owned()),
            _ => Self::Database(e),
        }
    }
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Request(_) => "E_STORE_REQUEST",
            Self::RowNotFound { .. } => "E_ROW_NOT_FOUND",
            Self::UnknownColumn { .. } => "E_UNKNOWN_COLUMN",
            Self::Conflict(_) => "E_CONFLICT",
            Self::DuplicateChannel(_) => "E_DUPLICATE_CHANNEL",
            Self::UnfilteredDelete(_) => "E_UNFILTERED_DELETE",
            Self::Decode(_) => "E_DECODE",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Database(_))
    }
}

/// Connectivity status reported by the store for one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    Connecting,
    Subscribed,
    TimedOut,
    ChannelError,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

impl ChangeType {
    /// Parse a trigger operation name (`INSERT`, `UPDATE`, `DELETE`).
    #[must_use]
    pub fn from_op(op: &str) -> Option<Self> {
        match op.to_ascii_uppercase().as_str() {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Everything a subscription can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    Status(StoreStatus),
    Change { kind: ResourceKind, event: ChangeType },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A live push subscription. Dropping the receiver does not unsubscribe;
/// call [`RemoteStore::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<StoreEvent>,
}

// =============================================================================
// TRAIT
// =============================================================================

#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Pull read. Always available, used by the fetcher and the pollers.
    async fn fetch(&self, kind: ResourceKind, filter: &Filter) -> Result<Vec<Row>, StoreError>;

    async fn insert(&self, kind: ResourceKind, row: Row) -> Result<Row, StoreError>;

    async fn update(&self, kind: ResourceKind, id: Uuid, patch: Row) -> Result<Row, StoreError>;

    async fn delete(&self, kind: ResourceKind, id: Uuid) -> Result<(), StoreError>;

    /// Delete every row matching a non-empty filter, returning the count.
    async fn delete_where(&self, kind: ResourceKind, filter: &Filter) -> Result<u64, StoreError>;

    /// Open a push subscription under a caller-chosen unique `name`.
    async fn subscribe(&self, kind: ResourceKind, filter: &Filter, name: &str) -> Result<Subscription, StoreError>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), StoreError>;
}

// =============================================================================
// ROW CODEC
// =============================================================================

/// Serialize a struct into a flat row.
///
/// # Errors
///
/// Returns `Decode` if the value does not serialize to a JSON object.
pub fn to_row<T: Serialize>(value: &T) -> Result<Row, StoreError> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(row) => Ok(row),
        other => Err(StoreError::Decode(serde::ser::Error::custom(format!("expected object row, got {other}")))),
    }
}

/// Decode a row into a domain struct.
///
/// # Errors
///
/// Returns `Decode` if the row does not match `T`.
pub fn from_row<T: DeserializeOwned>(row: Row) -> Result<T, StoreError> {
    Ok(serde_json::from_value(serde_json::Value::Object(row))?)
}

/// Decode a list of rows, failing on the first bad row.
///
/// # Errors
///
/// Returns `Decode` if any row does not match `T`.
pub fn from_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, StoreError> {
    rows.into_iter().map(from_row).collect()
}

/// Encode a UTC instant as fixed-width RFC 3339 so stored timestamps
/// order lexically.
#[must_use]
pub fn timestamp_value(at: time::OffsetDateTime) -> serde_json::Value {
    let format =
        time::macros::format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9]Z");
    at.to_offset(time::UtcOffset::UTC).format(format).map_or(serde_json::Value::Null, serde_json::Value::String)
}

/// Build a patch row from key/value pairs.
#[must_use]
pub fn patch<const N: usize>(pairs: [(&str, serde_json::Value); N]) -> Row {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v))
        .collect()
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

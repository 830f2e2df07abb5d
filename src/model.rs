//! Domain rows shared by the store backends, services, and the sync core.
//!
//! DESIGN
//! ======
//! Each struct mirrors one table of the remote store. Rows travel as JSON
//! objects across the store boundary and are decoded into these types by
//! the fetcher; timestamps are RFC 3339 strings on the wire.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// RESOURCE KIND
// =============================================================================

/// One entity collection of the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Sessions,
    Tasks,
    Participants,
    Progress,
}

impl ResourceKind {
    /// Every collection, in initial-load order.
    pub const ALL: [ResourceKind; 4] = [Self::Sessions, Self::Tasks, Self::Participants, Self::Progress];

    /// Collections that get a push channel while attached.
    pub const LIVE: [ResourceKind; 3] = [Self::Tasks, Self::Participants, Self::Progress];

    /// Backing table name.
    #[must_use]
    pub fn table(self) -> &'static str {
        match self {
            Self::Sessions => "sessions",
            Self::Tasks => "tasks",
            Self::Participants => "participants",
            Self::Progress => "progress",
        }
    }

    #[must_use]
    pub fn from_table(table: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.table() == table)
    }

    /// Columns accepted in filters, inserts, and patches.
    #[must_use]
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Sessions => &["id", "code", "title", "created_at", "active"],
            Self::Tasks => &["id", "session_id", "title", "order_index", "created_at"],
            Self::Participants => &["id", "session_id", "name", "last_seen", "created_at", "is_online"],
            Self::Progress => &["id", "participant_id", "task_id", "completed", "updated_at"],
        }
    }

    /// Column groups that must be unique across the collection.
    #[must_use]
    pub fn unique_keys(self) -> &'static [&'static [&'static str]] {
        match self {
            Self::Sessions => &[&["code"]],
            Self::Tasks => &[&["session_id", "order_index"]],
            Self::Participants => &[],
            Self::Progress => &[&["participant_id", "task_id"]],
        }
    }

    #[must_use]
    pub fn has_column(self, column: &str) -> bool {
        self.columns().contains(&column)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

// =============================================================================
// ROWS
// =============================================================================

/// A coordinator-owned session. The join code never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub active: bool,
}

/// One step of a session's task list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub session_id: Uuid,
    pub title: String,
    /// Display and completion-slot order, unique within the session.
    pub order_index: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A person attached to one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub session_id: Uuid,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub is_online: bool,
}

impl Participant {
    /// True when the heartbeat has been silent for longer than `stale_after`.
    ///
    /// The stored `is_online` flag is only written on connect/disconnect, so
    /// a participant that vanished without a disconnect keeps the flag set.
    /// Views combine both via [`Participant::appears_online`].
    #[must_use]
    pub fn is_stale(&self, now: OffsetDateTime, stale_after: Duration) -> bool {
        let silent = now - self.last_seen;
        silent.is_positive() && silent.unsigned_abs() > stale_after
    }

    #[must_use]
    pub fn appears_online(&self, now: OffsetDateTime, stale_after: Duration) -> bool {
        self.is_online && !self.is_stale(now, stale_after)
    }
}

/// Completion state of one task for one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub id: Uuid,
    pub participant_id: Uuid,
    pub task_id: Uuid,
    pub completed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Current wall-clock time in UTC.
#[must_use]
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;

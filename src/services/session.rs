//! Session lifecycle: creation with join codes, lookup, listing, removal.
//!
//! Join codes are six characters from `[A-Z0-9]`. Codes are generated
//! client-side and the store's unique constraint arbitrates collisions, so
//! creation retries a few times on conflict.

use rand::Rng;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{SyncError, require_text};
use crate::model::{ResourceKind, Session};
use crate::store::{Filter, RemoteStore, StoreError, from_row, from_rows, patch};

pub const CODE_LEN: usize = 6;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MAX_CODE_ATTEMPTS: usize = 5;

/// Generate a random join code.
#[must_use]
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
        .collect()
}

/// Trim and uppercase a user-entered code, rejecting malformed input.
///
/// # Errors
///
/// Returns `Validation` for blank codes or codes that are not six ASCII
/// letters or digits.
pub fn normalize_code(code: &str) -> Result<String, SyncError> {
    let code = require_text("session code", code)?.to_ascii_uppercase();
    if code.len() != CODE_LEN || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(SyncError::Validation(format!("session code must be {CODE_LEN} letters or digits")));
    }
    Ok(code)
}

/// Create an active session with a fresh join code.
///
/// # Errors
///
/// Returns `Validation` for a blank title, or `Store` when the insert fails
/// (including running out of code attempts).
pub async fn create_session(store: &dyn RemoteStore, title: &str) -> Result<Session, SyncError> {
    let title = require_text("session title", title)?;
    let mut last_conflict = None;
    for _ in 0..MAX_CODE_ATTEMPTS {
        let code = generate_code();
        let row = patch([("code", json!(code)), ("title", json!(title)), ("active", json!(true))]);
        match store.insert(ResourceKind::Sessions, row).await {
            Ok(row) => {
                let session: Session = from_row(row)?;
                info!(session_id = %session.id, code = %session.code, "session: created");
                return Ok(session);
            }
            Err(StoreError::Conflict(msg)) => {
                warn!(%code, "session: join code collision, retrying");
                last_conflict = Some(msg);
            }
            Err(e) => return Err(e.into()),
        }
    }
    let msg = last_conflict.unwrap_or_default();
    Err(StoreError::Conflict(msg).into())
}

/// Every session, newest first.
///
/// # Errors
///
/// Returns `Store` when the read fails.
pub async fn list_sessions(store: &dyn RemoteStore) -> Result<Vec<Session>, SyncError> {
    let rows = store.fetch(ResourceKind::Sessions, &Filter::new().order_by_desc("created_at")).await?;
    Ok(from_rows(rows)?)
}

/// Resolve a join code to its active session.
///
/// # Errors
///
/// Returns `Validation` for a malformed code, `NotFound` when no active
/// session carries it, or `Store` when the read fails.
pub async fn find_active_by_code(store: &dyn RemoteStore, code: &str) -> Result<Session, SyncError> {
    let code = normalize_code(code)?;
    let filter = Filter::new().eq("code", code.as_str()).eq("active", true);
    let rows = store.fetch(ResourceKind::Sessions, &filter).await?;
    from_rows::<Session>(rows)?.into_iter().next().ok_or(SyncError::NotFound(code))
}

/// Stop accepting joins without deleting anything.
///
/// # Errors
///
/// Returns `Store` when the update fails.
pub async fn close_session(store: &dyn RemoteStore, session_id: Uuid) -> Result<Session, SyncError> {
    let row = store.update(ResourceKind::Sessions, session_id, patch([("active", json!(false))])).await?;
    Ok(from_row(row)?)
}

/// Delete a session; the store cascades its tasks, participants, and progress.
///
/// # Errors
///
/// Returns `Store` when the delete fails.
pub async fn delete_session(store: &dyn RemoteStore, session_id: Uuid) -> Result<(), SyncError> {
    store.delete(ResourceKind::Sessions, session_id).await?;
    info!(%session_id, "session: deleted");
    Ok(())
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;

//! Error taxonomy for the sync layer and the services it shares a store with.
//!
//! DESIGN
//! ======
//! - Transient-Network failures surface as `SyncError::Store` and carry
//!   `retryable() == true`; timers and channel tasks log them and wait for
//!   the next natural trigger instead of returning them.
//! - Channel degradation is never an error value. It is reported through
//!   `SyncClient::is_connection_degraded`.
//! - `NotFound` and `Validation` are terminal for the request that raised them.

use crate::store::StoreError;

/// Grepable error code and retryable flag.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Blank or malformed user input, rejected before any network call.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The session code does not resolve to an active session.
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("not attached to a session")]
    NotAttached,

    /// The operation needs a participant identity but the attachment is a coordinator view.
    #[error("attachment has no participant identity")]
    NotParticipant,

    #[error("store request failed: {0}")]
    Store(#[from] StoreError),
}

impl ErrorCode for SyncError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E_VALIDATION",
            Self::NotFound(_) => "E_SESSION_NOT_FOUND",
            Self::NotAttached => "E_NOT_ATTACHED",
            Self::NotParticipant => "E_NOT_PARTICIPANT",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.retryable(),
            _ => false,
        }
    }
}

/// Reject blank input, returning the trimmed value.
pub(crate) fn require_text<'a>(field: &str, value: &'a str) -> Result<&'a str, SyncError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SyncError::Validation(format!("{field} must not be empty")));
    }
    Ok(trimmed)
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;

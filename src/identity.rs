//! Local identity persistence.
//!
//! A participant's id and display name are remembered per session code so
//! a reload or restart rejoins as the same participant instead of creating a
//! duplicate. This is the only state the sync layer persists itself.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity file io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("identity file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl ErrorCode for IdentityError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "E_IDENTITY_IO",
            Self::Corrupt(_) => "E_IDENTITY_CORRUPT",
        }
    }
}

/// Key for the remembered participant id of a session.
#[must_use]
pub fn participant_id_key(code: &str) -> String {
    format!("participant_id_{code}")
}

/// Key for the remembered display name of a session.
#[must_use]
pub fn participant_name_key(code: &str) -> String {
    format!("participant_name_{code}")
}

/// Small string key-value store that survives reloads.
pub trait IdentityStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// # Errors
    ///
    /// Returns an error when the value could not be persisted.
    fn set(&self, key: &str, value: &str) -> Result<(), IdentityError>;
}

// =============================================================================
// MEMORY
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryIdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), IdentityError> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner).insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

// =============================================================================
// FILE
// =============================================================================

/// JSON object on disk, loaded once and rewritten on every `set`. Memory
/// only changes once the file is replaced.
#[derive(Debug)]
pub struct FileIdentityStore {
    path: PathBuf,
    values: Mutex<HashMap<String, String>>,
}

impl FileIdentityStore {
    /// Open `path`, starting empty if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, IdentityError> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => HashMap::new(),
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, values: Mutex::new(values) })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl IdentityStore for FileIdentityStore {
    fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), IdentityError> {
        let mut values = self.lock();
        let mut next = values.clone();
        next.insert(key.to_owned(), value.to_owned());
        let raw = serde_json::to_string_pretty(&next)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path)?;
        *values = next;
        Ok(())
    }
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;

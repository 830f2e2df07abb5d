//! Runtime configuration parsed from environment variables.
//!
//! Every timing knob of the sync layer has a `DEFAULT_*` constant and an
//! optional `HANDSON_*` override. Unparseable values fall back to the
//! default rather than failing startup.

use std::path::PathBuf;
use std::time::Duration;

use crate::sync::{BackoffPolicy, PollIntervals};

pub const DEFAULT_HEARTBEAT_MS: u64 = 30_000;
pub const DEFAULT_HEALTH_CHECK_MS: u64 = 60_000;
pub const DEFAULT_POLL_TASKS_MS: u64 = 5_000;
pub const DEFAULT_POLL_PROGRESS_MS: u64 = 5_000;
pub const DEFAULT_POLL_PARTICIPANTS_MS: u64 = 10_000;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
pub const DEFAULT_BACKOFF_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_SUBSCRIBE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_IDENTITY_PATH: &str = ".handson-identity.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: u64) -> Duration {
    Duration::from_millis(env_parse(key, default))
}

// =============================================================================
// SYNC
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub heartbeat_interval: Duration,
    pub health_check_interval: Duration,
    pub poll: PollIntervals,
    pub backoff: BackoffPolicy,
    /// Longest a channel may sit in CONNECTING before it counts as degraded.
    pub subscribe_timeout: Duration,
    /// Stop a resource's poller once its channel is healthy again.
    pub stop_polling_on_recovery: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_MS),
            health_check_interval: Duration::from_millis(DEFAULT_HEALTH_CHECK_MS),
            poll: PollIntervals {
                tasks: Duration::from_millis(DEFAULT_POLL_TASKS_MS),
                progress: Duration::from_millis(DEFAULT_POLL_PROGRESS_MS),
                participants: Duration::from_millis(DEFAULT_POLL_PARTICIPANTS_MS),
            },
            backoff: BackoffPolicy {
                base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
                max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
                max_attempts: DEFAULT_BACKOFF_MAX_ATTEMPTS,
            },
            subscribe_timeout: Duration::from_millis(DEFAULT_SUBSCRIBE_TIMEOUT_MS),
            stop_polling_on_recovery: false,
        }
    }
}

impl SyncConfig {
    /// Build from `HANDSON_*` variables, defaulting each one independently.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            heartbeat_interval: env_millis("HANDSON_HEARTBEAT_MS", DEFAULT_HEARTBEAT_MS),
            health_check_interval: env_millis("HANDSON_HEALTH_CHECK_MS", DEFAULT_HEALTH_CHECK_MS),
            poll: PollIntervals {
                tasks: env_millis("HANDSON_POLL_TASKS_MS", DEFAULT_POLL_TASKS_MS),
                progress: env_millis("HANDSON_POLL_PROGRESS_MS", DEFAULT_POLL_PROGRESS_MS),
                participants: env_millis("HANDSON_POLL_PARTICIPANTS_MS", DEFAULT_POLL_PARTICIPANTS_MS),
            },
            backoff: BackoffPolicy {
                base: env_millis("HANDSON_BACKOFF_BASE_MS", DEFAULT_BACKOFF_BASE_MS),
                max: env_millis("HANDSON_BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
                max_attempts: env_parse("HANDSON_BACKOFF_MAX_ATTEMPTS", DEFAULT_BACKOFF_MAX_ATTEMPTS),
            },
            subscribe_timeout: env_millis("HANDSON_SUBSCRIBE_TIMEOUT_MS", DEFAULT_SUBSCRIBE_TIMEOUT_MS),
            stop_polling_on_recovery: env_parse("HANDSON_POLL_STOP_ON_RECOVERY", false),
        }
    }

    /// Silence after which a participant no longer appears online.
    #[must_use]
    pub fn presence_stale_after(&self) -> Duration {
        self.heartbeat_interval * 3
    }
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub identity_path: PathBuf,
}

impl StoreConfig {
    /// Required: `DATABASE_URL`. Optional: `DB_MAX_CONNECTIONS`, `HANDSON_IDENTITY_PATH`.
    ///
    /// # Errors
    ///
    /// Returns `Missing` when `DATABASE_URL` is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;
        let identity_path =
            std::env::var("HANDSON_IDENTITY_PATH").unwrap_or_else(|_| DEFAULT_IDENTITY_PATH.to_owned());
        Ok(Self {
            database_url,
            max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            identity_path: PathBuf::from(identity_path),
        })
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

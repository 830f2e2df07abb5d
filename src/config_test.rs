use super::*;

// =============================================================================
// env_parse
// =============================================================================

#[test]
fn env_parse_missing_returns_default() {
    let val: u64 = env_parse("__HANDSON_TEST_MISSING__", 42);
    assert_eq!(val, 42);
}

#[test]
fn env_parse_present_valid() {
    unsafe { std::env::set_var("__HANDSON_TEST_VALID__", "99") };
    let val: u64 = env_parse("__HANDSON_TEST_VALID__", 0);
    assert_eq!(val, 99);
    unsafe { std::env::remove_var("__HANDSON_TEST_VALID__") };
}

#[test]
fn env_parse_invalid_returns_default() {
    unsafe { std::env::set_var("__HANDSON_TEST_INVALID__", "soon") };
    let val: u32 = env_parse("__HANDSON_TEST_INVALID__", 7);
    assert_eq!(val, 7);
    unsafe { std::env::remove_var("__HANDSON_TEST_INVALID__") };
}

#[test]
fn env_parse_bool() {
    unsafe { std::env::set_var("__HANDSON_TEST_BOOL__", "true") };
    assert!(env_parse("__HANDSON_TEST_BOOL__", false));
    unsafe { std::env::remove_var("__HANDSON_TEST_BOOL__") };
}

// =============================================================================
// SyncConfig
// =============================================================================

#[test]
fn defaults_match_constants() {
    let config = SyncConfig::default();
    assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
    assert_eq!(config.health_check_interval, Duration::from_secs(60));
    assert_eq!(config.poll.tasks, Duration::from_secs(5));
    assert_eq!(config.poll.progress, Duration::from_secs(5));
    assert_eq!(config.poll.participants, Duration::from_secs(10));
    assert_eq!(config.backoff.base, Duration::from_secs(1));
    assert_eq!(config.backoff.max, Duration::from_secs(30));
    assert_eq!(config.backoff.max_attempts, 5);
    assert_eq!(config.subscribe_timeout, Duration::from_secs(10));
    assert!(!config.stop_polling_on_recovery);
}

#[test]
fn from_env_reads_overrides() {
    unsafe {
        std::env::set_var("HANDSON_POLL_PARTICIPANTS_MS", "2500");
        std::env::set_var("HANDSON_BACKOFF_MAX_ATTEMPTS", "3");
    }
    let config = SyncConfig::from_env();
    assert_eq!(config.poll.participants, Duration::from_millis(2500));
    assert_eq!(config.backoff.max_attempts, 3);
    unsafe {
        std::env::remove_var("HANDSON_POLL_PARTICIPANTS_MS");
        std::env::remove_var("HANDSON_BACKOFF_MAX_ATTEMPTS");
    }
}

#[test]
fn presence_threshold_is_three_heartbeats() {
    assert_eq!(SyncConfig::default().presence_stale_after(), Duration::from_secs(90));
}

// =============================================================================
// StoreConfig
// =============================================================================

#[test]
fn store_config_requires_database_url() {
    unsafe {
        std::env::remove_var("DATABASE_URL");
    }
    assert!(matches!(StoreConfig::from_env(), Err(ConfigError::Missing("DATABASE_URL"))));

    unsafe {
        std::env::set_var("DATABASE_URL", "postgres://localhost/handson");
        std::env::remove_var("HANDSON_IDENTITY_PATH");
    }
    let config = StoreConfig::from_env().unwrap();
    assert_eq!(config.database_url, "postgres://localhost/handson");
    assert_eq!(config.identity_path, PathBuf::from(DEFAULT_IDENTITY_PATH));
    unsafe { std::env::remove_var("DATABASE_URL") };
}

use super::*;

#[test]
fn keys_are_scoped_by_code() {
    assert_eq!(participant_id_key("ABC123"), "participant_id_ABC123");
    assert_eq!(participant_name_key("ABC123"), "participant_name_ABC123");
}

#[test]
fn memory_store_round_trip() {
    let store = MemoryIdentityStore::new();
    assert_eq!(store.get("k"), None);
    store.set("k", "v").unwrap();
    assert_eq!(store.get("k").as_deref(), Some("v"));
}

#[test]
fn file_store_missing_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileIdentityStore::open(dir.path().join("identity.json")).unwrap();
    assert_eq!(store.get(&participant_id_key("ABC123")), None);
}

#[test]
fn file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.json");
    {
        let store = FileIdentityStore::open(&path).unwrap();
        store.set(&participant_id_key("ABC123"), "2b1c").unwrap();
        store.set(&participant_name_key("ABC123"), "Ada").unwrap();
    }
    let reopened = FileIdentityStore::open(&path).unwrap();
    assert_eq!(reopened.get("participant_id_ABC123").as_deref(), Some("2b1c"));
    assert_eq!(reopened.get("participant_name_ABC123").as_deref(), Some("Ada"));
    assert!(!path.with_extension("tmp").exists());
}

#[test]
fn file_store_rejects_corrupt_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.json");
    std::fs::write(&path, "{not json").unwrap();
    let err = FileIdentityStore::open(&path).unwrap_err();
    assert_eq!(err.error_code(), "E_IDENTITY_CORRUPT");
}

#[test]
fn file_store_failed_write_leaves_memory_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileIdentityStore::open(dir.path().join("missing").join("identity.json")).unwrap();

    assert!(matches!(store.set(&participant_id_key("ABC123"), "2b1c"), Err(IdentityError::Io(_))));
    assert_eq!(store.get(&participant_id_key("ABC123")), None);
}

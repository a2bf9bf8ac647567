//! Unit tests for the on-disk session record.

use std::collections::BTreeMap;

use debug_bridge::models::record::SessionRecord;
use debug_bridge::persistence::session_store::SessionStore;
use debug_bridge::runtime::RuntimeKind;
use debug_bridge::AppError;

fn record() -> SessionRecord {
    let mut breakpoints = BTreeMap::new();
    breakpoints.insert("/app/main.js".to_owned(), vec![3, 10]);
    SessionRecord {
        runtime_kind: RuntimeKind::Node,
        program: "/app/main.js".into(),
        breakpoints,
        daemon_port: 41234,
        daemon_pid: 4242,
        started_at: chrono::Utc::now(),
    }
}

#[test]
fn missing_file_loads_as_none() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join(".debug_session.json"));
    assert_eq!(store.load().unwrap(), None);
}

#[test]
fn save_then_load_returns_the_same_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join(".debug_session.json"));
    let original = record();

    store.save(&original).unwrap();
    assert_eq!(store.load().unwrap(), Some(original));
}

#[test]
fn file_uses_documented_field_names() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    SessionStore::new(&path).save(&record()).unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["runtime_kind"], "node");
    assert_eq!(raw["program"], "/app/main.js");
    assert_eq!(raw["breakpoints"]["/app/main.js"], serde_json::json!([3, 10]));
    assert_eq!(raw["daemon_port"], 41234);
    assert_eq!(raw["daemon_pid"], 4242);
}

#[test]
fn record_without_breakpoints_or_timestamp_still_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    std::fs::write(
        &path,
        r#"{"runtime_kind":"python","program":"/app/main.py","daemon_port":5000,"daemon_pid":77}"#,
    )
    .unwrap();

    let loaded = SessionStore::new(&path).load().unwrap().unwrap();
    assert_eq!(loaded.runtime_kind, RuntimeKind::Python);
    assert!(loaded.breakpoints.is_empty());
}

#[test]
fn save_overwrites_and_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("nested/state/session.json"));
    store.save(&record()).unwrap();

    let mut updated = record();
    updated.add_breakpoint("/app/util.js", 1);
    store.save(&updated).unwrap();

    assert_eq!(store.load().unwrap(), Some(updated));
    let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("nested/state"))
        .unwrap()
        .collect();
    assert_eq!(leftovers.len(), 1, "no temporary files left behind");
}

#[test]
fn corrupt_record_is_a_state_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = SessionStore::new(&path).load().unwrap_err();
    assert!(matches!(err, AppError::State(ref m) if m.contains("corrupt")));
}

#[test]
fn delete_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("session.json"));
    store.save(&record()).unwrap();

    store.delete().unwrap();
    assert_eq!(store.load().unwrap(), None);
    store.delete().unwrap();
}

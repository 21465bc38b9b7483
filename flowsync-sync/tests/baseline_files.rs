//! Baseline persistence and sync-directory file handling on a real filesystem.

use std::time::{Duration, UNIX_EPOCH};

use assert_fs::prelude::*;
use filetime::{set_file_mtime, FileTime};
use predicates::prelude::*;

use flowsync_core::{EngineConfig, WorkflowDocument, WorkflowId};
use flowsync_sync::{files, hash_document, StateStore};

fn doc(json: &str) -> WorkflowDocument {
    WorkflowDocument::parse(json).expect("doc")
}

#[test]
fn baseline_survives_a_fresh_store() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let config = EngineConfig::new(dir.path());
    let id = WorkflowId::from("42");

    StateStore::for_config(&config)
        .upsert(&id, "abc", "Invoice.json")
        .expect("upsert");

    dir.child(".flowsync-state.json")
        .assert(predicate::str::contains("lastSyncedHash"))
        .assert(predicate::str::contains("Invoice.json"));
    dir.child(".flowsync-state.json.tmp")
        .assert(predicate::path::missing());

    let reopened = StateStore::for_config(&config);
    let record = reopened.get(&id).expect("record");
    assert_eq!(record.last_synced_hash, "abc");
    assert_eq!(record.filename, "Invoice.json");
}

#[test]
fn corrupt_baseline_reads_as_empty() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    dir.child(".flowsync-state.json")
        .write_str("{ not json")
        .expect("write");

    let store = StateStore::for_config(&EngineConfig::new(dir.path()));
    assert!(store.load().workflows.is_empty());

    // The next write replaces the corrupt file.
    store
        .upsert(&WorkflowId::from("1"), "h", "A.json")
        .expect("upsert");
    assert_eq!(store.load().workflows.len(), 1);
}

#[test]
fn workflow_write_leaves_no_temp_file() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let target = dir.child("Flow.json");

    files::write_workflow(target.path(), &doc(r#"{"name":"Flow","nodes":[]}"#)).expect("write");

    target.assert(predicate::str::ends_with("\n"));
    target.assert(predicate::str::contains("\"name\": \"Flow\""));
    dir.child("Flow.json.flowsync.tmp")
        .assert(predicate::path::missing());
}

#[test]
fn listing_skips_hidden_state_and_foreign_files() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    dir.child("A.json").write_str("{}").expect("write");
    dir.child("b.JSON").write_str("{}").expect("write");
    dir.child(".flowsync-state.json").write_str("{}").expect("write");
    dir.child(".hidden.json").write_str("{}").expect("write");
    dir.child("notes.txt").write_str("hi").expect("write");
    dir.child(".backups").create_dir_all().expect("mkdir");
    dir.child(".backups/old.json").write_str("{}").expect("write");

    let config = EngineConfig::new(dir.path());
    let names = files::list_workflow_files(dir.path(), &config).expect("list");
    assert_eq!(names, vec!["A.json".to_string(), "b.JSON".to_string()]);
}

#[test]
fn identity_scan_finds_the_right_file() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    dir.child("One.json").write_str(r#"{"id":"1"}"#).expect("write");
    dir.child("Two.json").write_str(r#"{"id":"2"}"#).expect("write");
    dir.child("Broken.json").write_str("{").expect("write");

    let config = EngineConfig::new(dir.path());
    let found = files::find_file_with_identity(dir.path(), &WorkflowId::from("2"), &config)
        .expect("scan");
    assert_eq!(found.as_deref(), Some("Two.json"));
    let missing = files::find_file_with_identity(dir.path(), &WorkflowId::from("3"), &config)
        .expect("scan");
    assert_eq!(missing, None);
}

#[test]
fn archive_and_backup_use_their_own_directories() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    dir.child("Flow.json").write_str(r#"{"id":"1"}"#).expect("write");
    let config = EngineConfig::new(dir.path());

    let archived = files::archive_file(&config, "Flow.json").expect("archive");
    dir.child("Flow.json").assert(predicate::path::missing());
    assert!(archived.starts_with(dir.path().join(".archive")));
    assert!(archived.to_string_lossy().ends_with("_Flow.json"));

    let backup = files::write_backup(&config, "Flow.json", &doc(r#"{"id":"1"}"#)).expect("backup");
    assert!(backup.starts_with(dir.path().join(".backups")));
    assert!(backup.exists());
}

#[test]
fn key_order_and_whitespace_do_not_change_the_hash() {
    let compact = doc(r#"{"b":1,"a":{"y":2,"x":[3,4]}}"#);
    let pretty = doc("{\n  \"a\": { \"x\": [3, 4], \"y\": 2 },\n  \"b\": 1\n}");
    assert_eq!(hash_document(&compact), hash_document(&pretty));
    assert_ne!(hash_document(&compact), hash_document(&doc(r#"{"b":1,"a":{"y":2,"x":[4,3]}}"#)));
}

#[test]
fn modified_time_follows_the_file_mtime() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("Flow.json");
    file.write_str(r#"{"name":"Flow"}"#).expect("write");
    set_file_mtime(file.path(), FileTime::from_unix_time(1_000, 0)).expect("mtime");

    assert_eq!(
        files::modified_time(file.path()),
        Some(UNIX_EPOCH + Duration::from_secs(1_000))
    );
    assert_eq!(files::modified_time(&dir.path().join("missing.json")), None);
}

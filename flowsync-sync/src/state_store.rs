//! Persistent state store holding the durable baseline.
//!
//! Persists a [`StateFile`] JSON document inside the sync directory:
//!
//! ```text
//! { "workflows": { "<id>": { "lastSyncedHash": "..", "lastSyncedAt": "..", "filename": ".." } } }
//! ```
//!
//! Writes use the atomic `.tmp` + rename pattern. Reads always go back to
//! disk; nothing here caches the baseline.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use flowsync_core::{EngineConfig, WorkflowId};

use crate::error::{io_err, SyncError};

/// Last state both sides were known to agree on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BaselineRecord {
    pub last_synced_hash: String,
    pub last_synced_at: DateTime<Utc>,
    pub filename: String,
}

/// On-disk baseline payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateFile {
    #[serde(default)]
    pub workflows: BTreeMap<WorkflowId, BaselineRecord>,
}

/// Handle on the baseline file. Cheap to clone; holds only the path.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_config(config: &EngineConfig) -> Self {
        Self::new(config.state_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the baseline.
    ///
    /// Returns an empty state if the file is missing, unreadable, or
    /// malformed; never fails.
    pub fn load(&self) -> StateFile {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return StateFile::default(),
            Err(err) => {
                tracing::warn!(
                    "unreadable state file {}, starting from empty baseline: {err}",
                    self.path.display()
                );
                return StateFile::default();
            }
        };
        match serde_json::from_str::<StateFile>(&contents) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(
                    "malformed state file {}, starting from empty baseline: {err}",
                    self.path.display()
                );
                StateFile::default()
            }
        }
    }

    /// Save the full state atomically.
    ///
    /// Writes to `<path>.tmp` then renames to `<path>`.
    pub fn save(&self, state: &StateFile) -> Result<(), SyncError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&self.path, e));
        }
        Ok(())
    }

    /// Fresh read of one record.
    pub fn get(&self, id: &WorkflowId) -> Option<BaselineRecord> {
        self.load().workflows.remove(id)
    }

    /// Record `hash` as the agreed state of `id`.
    ///
    /// When the stored record already has the same hash and filename the
    /// file is left untouched, so repeating a commit keeps the original
    /// timestamp.
    pub fn upsert(
        &self,
        id: &WorkflowId,
        hash: &str,
        filename: &str,
    ) -> Result<BaselineRecord, SyncError> {
        let mut state = self.load();
        if let Some(existing) = state.workflows.get(id) {
            if existing.last_synced_hash == hash && existing.filename == filename {
                tracing::debug!("baseline unchanged for {id}");
                return Ok(existing.clone());
            }
        }
        let record = BaselineRecord {
            last_synced_hash: hash.to_string(),
            last_synced_at: Utc::now(),
            filename: filename.to_string(),
        };
        state.workflows.insert(id.clone(), record.clone());
        self.save(&state)?;
        tracing::info!("baseline advanced for {id} ({filename})");
        Ok(record)
    }

    /// Drop the record for `id`, returning it if there was one.
    pub fn remove(&self, id: &WorkflowId) -> Result<Option<BaselineRecord>, SyncError> {
        let mut state = self.load();
        let removed = state.workflows.remove(id);
        if removed.is_some() {
            self.save(&state)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> StateStore {
        StateStore::new(dir.path().join(".flowsync-state.json"))
    }

    #[test]
    fn empty_state_when_file_missing() {
        let tmp = TempDir::new().unwrap();
        assert!(store(&tmp).load().workflows.is_empty());
    }

    #[test]
    fn corrupt_file_loads_as_empty() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        std::fs::write(store.path(), "{ not json").unwrap();
        assert!(store.load().workflows.is_empty());
    }

    #[test]
    fn wrong_shape_loads_as_empty() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        std::fs::write(store.path(), r#"{"workflows": [1, 2]}"#).unwrap();
        assert!(store.load().workflows.is_empty());
    }

    #[test]
    fn roundtrip_save_load() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.upsert(&WorkflowId::from("42"), "h0", "Invoice.json").unwrap();

        let loaded = store.load();
        let record = loaded.workflows.get(&WorkflowId::from("42")).unwrap();
        assert_eq!(record.last_synced_hash, "h0");
        assert_eq!(record.filename, "Invoice.json");
    }

    #[test]
    fn file_uses_camel_case_layout() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.upsert(&WorkflowId::from("42"), "h0", "Invoice.json").unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        let record = &raw["workflows"]["42"];
        assert_eq!(record["lastSyncedHash"], "h0");
        assert_eq!(record["filename"], "Invoice.json");
        assert!(record["lastSyncedAt"].is_string());
    }

    #[test]
    fn repeated_upsert_keeps_timestamp() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let id = WorkflowId::from("42");
        let first = store.upsert(&id, "h0", "Invoice.json").unwrap();
        let second = store.upsert(&id, "h0", "Invoice.json").unwrap();
        assert_eq!(first, second);

        let third = store.upsert(&id, "h1", "Invoice.json").unwrap();
        assert_eq!(third.last_synced_hash, "h1");
        assert!(third.last_synced_at >= first.last_synced_at);
    }

    #[test]
    fn remove_deletes_record() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let id = WorkflowId::from("42");
        store.upsert(&id, "h0", "Invoice.json").unwrap();

        assert!(store.remove(&id).unwrap().is_some());
        assert!(store.get(&id).is_none());
        assert!(store.remove(&id).unwrap().is_none());
    }

    #[test]
    fn tmp_file_cleaned_up_after_save() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.save(&StateFile::default()).unwrap();
        assert!(!store.path().with_extension("json.tmp").exists());
    }
}

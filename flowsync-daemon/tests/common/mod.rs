#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio::sync::broadcast::{self, error::TryRecvError};

use flowsync_core::{
    EngineConfig, FieldSanitizer, InMemoryRemote, SyncEvent, SyncStatus, WorkflowDocument,
    WorkflowId,
};
use flowsync_daemon::SyncEngine;

pub struct Harness {
    pub dir: TempDir,
    pub remote: Arc<InMemoryRemote>,
    pub engine: SyncEngine,
    pub events: broadcast::Receiver<SyncEvent>,
}

impl Harness {
    /// Fresh engine over an empty directory, subscribed before startup.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("sync dir");
        Self::in_dir(dir, Arc::new(InMemoryRemote::new()))
    }

    /// Engine over an existing directory and remote (used to simulate a restart).
    pub fn in_dir(dir: TempDir, remote: Arc<InMemoryRemote>) -> Self {
        let config = EngineConfig::new(dir.path());
        let engine = SyncEngine::new(config, remote.clone(), Arc::new(FieldSanitizer::new()))
            .expect("engine");
        let events = engine.subscribe();
        Self {
            dir,
            remote,
            engine,
            events,
        }
    }

    pub fn path(&self, filename: &str) -> PathBuf {
        self.dir.path().join(filename)
    }

    pub fn write(&self, filename: &str, doc: &WorkflowDocument) {
        let body = doc.to_pretty_json().expect("render");
        std::fs::write(self.path(filename), body).expect("write doc");
    }

    pub fn read(&self, filename: &str) -> WorkflowDocument {
        let raw = std::fs::read_to_string(self.path(filename)).expect("read doc");
        WorkflowDocument::parse(&raw).expect("parse doc")
    }

    pub fn drain(&mut self) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        events
    }

    /// Start the engine and pull `id` into `filename`, leaving it IN_SYNC
    /// with no pending notifications.
    pub async fn start_with_synced(&mut self, id: &str, name: &str, filename: &str) -> WorkflowId {
        self.remote.put(id, doc(name, 1));
        self.engine.start().await.expect("start");
        let id = WorkflowId::from(id);
        self.engine
            .pull(&id, filename, SyncStatus::ExistOnlyRemotely)
            .await
            .expect("pull");
        assert_eq!(self.engine.status_of(&id).await, Some(SyncStatus::InSync));
        self.drain();
        id
    }
}

/// A small workflow whose content differs per `version`.
pub fn doc(name: &str, version: u64) -> WorkflowDocument {
    WorkflowDocument::from_value(json!({
        "name": name,
        "nodes": [{ "name": "Start", "type": "trigger", "parameters": { "version": version } }],
        "connections": {},
    }))
    .expect("doc")
}

/// Status notifications only, as (id, filename, status).
pub fn statuses(events: &[SyncEvent]) -> Vec<(Option<WorkflowId>, Option<String>, SyncStatus)> {
    events
        .iter()
        .filter_map(|event| match event {
            SyncEvent::StatusChanged {
                id,
                filename,
                status,
            } => Some((id.clone(), filename.clone(), *status)),
            _ => None,
        })
        .collect()
}

/// Long enough for every pending deletion timer to fire.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(2500)).await;
}

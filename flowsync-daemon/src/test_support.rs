use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use tokio::sync::broadcast::{self, error::TryRecvError};

use flowsync_core::{EngineConfig, FieldSanitizer, InMemoryRemote, SyncEvent, WorkflowDocument};

use crate::engine::SyncEngine;

pub(crate) struct Fixture {
    pub(crate) dir: TempDir,
    pub(crate) remote: Arc<InMemoryRemote>,
    pub(crate) engine: SyncEngine,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub(crate) fn with_config(adjust: impl FnOnce(&mut EngineConfig)) -> Self {
        let dir = TempDir::new().expect("sync dir");
        let mut config = EngineConfig::new(dir.path());
        adjust(&mut config);
        let remote = Arc::new(InMemoryRemote::new());
        let engine = SyncEngine::new(config, remote.clone(), Arc::new(FieldSanitizer::new()))
            .expect("engine");
        Self {
            dir,
            remote,
            engine,
        }
    }
}

/// A small workflow whose content differs per `version`.
pub(crate) fn doc(name: &str, version: u64) -> WorkflowDocument {
    WorkflowDocument::from_value(json!({
        "name": name,
        "nodes": [{ "name": "Start", "type": "trigger", "parameters": { "version": version } }],
        "connections": {},
    }))
    .expect("doc")
}

pub(crate) fn write_doc(dir: &TempDir, filename: &str, doc: &WorkflowDocument) {
    let body = doc.to_pretty_json().expect("render");
    std::fs::write(dir.path().join(filename), body).expect("write doc");
}

pub(crate) fn drain(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

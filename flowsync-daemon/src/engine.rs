//! The reconciliation engine.
//!
//! [`SyncEngine`] owns every piece of mutable reconciliation state behind a
//! single async mutex. Local observation (`observer`), remote polling
//! (`poller`), and user-triggered actions (`actions`) are separate `impl`
//! blocks over the same handle. The mutex is never held across a remote call.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use flowsync_core::{
    EngineConfig, ItemKey, RemoteApi, Sanitizer, SyncEvent, SyncStatus, WorkflowDocument,
    WorkflowId,
};
use flowsync_sync::{
    classify, files, hash_document, IdentityRegistry, MuteRegistry, StateStore, StatusTracker,
};

use crate::error::{io_err, EngineError};
use crate::observer::PendingOps;

const EVENT_CAPACITY: usize = 256;

/// Cheap to clone; every clone drives the same engine.
#[derive(Clone)]
pub struct SyncEngine {
    pub(crate) inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) remote: Arc<dyn RemoteApi>,
    pub(crate) sanitizer: Arc<dyn Sanitizer>,
    pub(crate) store: StateStore,
    pub(crate) mutes: MuteRegistry,
    pub(crate) state: Mutex<EngineState>,
    pub(crate) events: broadcast::Sender<SyncEvent>,
    pub(crate) shutdown: CancellationToken,
    /// Statuses are neither recorded nor broadcast until startup completes.
    pub(crate) started: AtomicBool,
    pub(crate) connected: AtomicBool,
    pub(crate) polling_enabled: AtomicBool,
    pub(crate) poll_in_flight: AtomicBool,
}

/// In-memory caches. Everything here can be rebuilt from disk and the remote
/// except the pending deletion timers.
#[derive(Debug, Default)]
pub(crate) struct EngineState {
    pub(crate) registry: IdentityRegistry,
    /// Keyed by filename, since identity-less files have a hash too.
    pub(crate) local_hashes: HashMap<String, String>,
    pub(crate) remote_hashes: HashMap<WorkflowId, String>,
    /// Last-modified markers from the listing, used to skip unchanged fetches.
    pub(crate) remote_markers: HashMap<WorkflowId, String>,
    pub(crate) tracker: StatusTracker,
    /// Listed remotely but the last fetch failed; no usable remote hash.
    pub(crate) unfetched: HashSet<WorkflowId>,
    /// Identities forced to CONFLICT after a file changed identity underneath
    /// us. Cleared by commit, forget, or a listing that contains them.
    pub(crate) drifted: HashSet<WorkflowId>,
    pub(crate) pending: PendingOps,
}

/// One row of [`SyncEngine::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemStatus {
    pub id: Option<WorkflowId>,
    pub filename: Option<String>,
    pub status: SyncStatus,
}

impl SyncEngine {
    /// Build an engine for `config`. Nothing is scanned or polled until
    /// [`SyncEngine::start`].
    pub fn new(
        config: EngineConfig,
        remote: Arc<dyn RemoteApi>,
        sanitizer: Arc<dyn Sanitizer>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        std::fs::create_dir_all(&config.sync_dir).map_err(|e| io_err(&config.sync_dir, e))?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let store = StateStore::for_config(&config);
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                remote,
                sanitizer,
                store,
                mutes: MuteRegistry::new(),
                state: Mutex::new(EngineState::default()),
                events,
                shutdown: CancellationToken::new(),
                started: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                polling_enabled: AtomicBool::new(false),
                poll_in_flight: AtomicBool::new(false),
            }),
        })
    }

    /// Restore bindings from the baseline, scan the sync directory, then run
    /// the mandatory first poll.
    ///
    /// Fails with [`EngineError::ConnectivityAtStartup`] if the remote cannot
    /// be reached: the engine never starts offline.
    pub async fn start(&self) -> Result<(), EngineError> {
        let baseline = self.inner.store.load();
        {
            let mut state = self.lock().await;
            let restored = state.registry.restore_from_baseline(&baseline);
            tracing::info!(
                restored,
                dir = %self.inner.config.sync_dir.display(),
                "restored identity bindings from baseline"
            );
        }

        let names = files::list_workflow_files(&self.inner.config.sync_dir, &self.inner.config)?;
        tracing::info!(files = names.len(), "scanning sync directory");
        for name in &names {
            self.handle_local_change(name).await;
        }

        match self.poll_cycle().await {
            Ok(report) => {
                tracing::info!(
                    listed = report.listed,
                    fetched = report.fetched,
                    "initial poll completed"
                );
            }
            Err(err) if err.is_connectivity() => {
                return Err(EngineError::ConnectivityAtStartup(err.to_string()));
            }
            Err(err) => return Err(EngineError::Remote(err)),
        }

        self.inner.connected.store(true, Ordering::SeqCst);
        self.inner.polling_enabled.store(true, Ordering::SeqCst);
        self.inner.started.store(true, Ordering::SeqCst);

        let mut state = self.lock().await;
        self.refresh_all(&mut state);
        Ok(())
    }

    /// Receive every notification emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Cancel pending deletion timers and stop the runtime loop.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Current status of a remote-identified workflow, freshly evaluated.
    pub async fn status_of(&self, id: &WorkflowId) -> Option<SyncStatus> {
        let state = self.lock().await;
        self.evaluate(&state, &ItemKey::Workflow(id.clone()))
    }

    /// Current status of whatever lives at `filename`.
    pub async fn status_of_file(&self, filename: &str) -> Option<SyncStatus> {
        let state = self.lock().await;
        let key = match state.registry.identity_of(filename) {
            Some(id) => ItemKey::Workflow(id.clone()),
            None => ItemKey::File(filename.to_string()),
        };
        self.evaluate(&state, &key)
    }

    /// Identity currently bound to `filename`.
    pub async fn identity_of(&self, filename: &str) -> Option<WorkflowId> {
        self.lock().await.registry.identity_of(filename).cloned()
    }

    /// Filename currently bound to `id`.
    pub async fn filename_of(&self, id: &WorkflowId) -> Option<String> {
        self.lock().await.registry.filename_of(id).map(str::to_string)
    }

    /// Every tracked item with its last broadcast status.
    pub async fn snapshot(&self) -> Vec<ItemStatus> {
        let state = self.lock().await;
        let mut items: Vec<ItemStatus> = state
            .tracker
            .iter()
            .map(|(key, status)| match key {
                ItemKey::Workflow(id) => ItemStatus {
                    id: Some(id.clone()),
                    filename: state.registry.filename_of(id).map(str::to_string),
                    status,
                },
                ItemKey::File(name) => ItemStatus {
                    id: None,
                    filename: Some(name.clone()),
                    status,
                },
            })
            .collect();
        items.sort_by(|a, b| a.filename.cmp(&b.filename).then_with(|| a.id.cmp(&b.id)));
        items
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    pub(crate) async fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.inner.state.lock().await
    }

    pub(crate) fn path_of(&self, filename: &str) -> PathBuf {
        self.inner.config.sync_dir.join(filename)
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        tracing::debug!(?event, "emitting");
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    pub(crate) fn emit_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{message}");
        self.emit(SyncEvent::Error { message });
    }

    /// Hash of `doc` as it would look once stored locally, minus volatile
    /// fields. Local files, remote documents, and the baseline all use this.
    pub(crate) fn content_hash(&self, doc: &WorkflowDocument) -> String {
        let stored = self.inner.sanitizer.for_storage(doc);
        hash_document(&self.inner.sanitizer.for_hashing(&stored))
    }

    /// Run the decision table for `key` against the current caches and a
    /// fresh read of the baseline.
    pub(crate) fn evaluate(&self, state: &EngineState, key: &ItemKey) -> Option<SyncStatus> {
        let id = match key {
            ItemKey::File(name) => {
                return classify(state.local_hashes.get(name).map(String::as_str), None, None);
            }
            ItemKey::Workflow(id) => id,
        };

        if state.drifted.contains(id) {
            return Some(SyncStatus::Conflict);
        }

        let local = state
            .registry
            .filename_of(id)
            .and_then(|name| state.local_hashes.get(name))
            .map(String::as_str);
        let remote = state.remote_hashes.get(id).map(String::as_str);
        let baseline = self.inner.store.get(id).map(|record| record.last_synced_hash);
        let computed = classify(local, remote, baseline.as_deref());

        // An absent remote hash means nothing while we cannot reach the remote.
        let remote_unknown = !self.is_connected() || state.unfetched.contains(id);
        if remote.is_none() && remote_unknown && self.inner.started.load(Ordering::SeqCst) {
            return match state.tracker.last(key) {
                Some(last) => Some(last),
                None => computed.filter(|status| *status != SyncStatus::DeletedRemotely),
            };
        }
        computed
    }

    /// Re-evaluate `key`, broadcasting only if its status changed.
    pub(crate) fn refresh(&self, state: &mut EngineState, key: ItemKey) {
        if !self.inner.started.load(Ordering::SeqCst) {
            return;
        }
        match self.evaluate(state, &key) {
            Some(status) => {
                if state.tracker.observe(key.clone(), status) {
                    let (id, filename) = match &key {
                        ItemKey::Workflow(id) => (
                            Some(id.clone()),
                            state.registry.filename_of(id).map(str::to_string),
                        ),
                        ItemKey::File(name) => (None, Some(name.clone())),
                    };
                    tracing::info!(item = %key, status = %status, "status changed");
                    self.emit(SyncEvent::StatusChanged {
                        id,
                        filename,
                        status,
                    });
                }
            }
            None => {
                if state.tracker.forget(&key).is_some() {
                    tracing::debug!(item = %key, "no longer tracked");
                }
            }
        }
    }

    /// Re-evaluate every known item.
    pub(crate) fn refresh_all(&self, state: &mut EngineState) {
        let mut ids: BTreeSet<WorkflowId> = state.remote_hashes.keys().cloned().collect();
        ids.extend(state.registry.iter().map(|(id, _)| id.clone()));
        ids.extend(self.inner.store.load().workflows.into_keys());

        let anonymous: BTreeSet<String> = state
            .local_hashes
            .keys()
            .filter(|name| state.registry.identity_of(name).is_none())
            .cloned()
            .collect();

        for id in ids {
            self.refresh(state, ItemKey::Workflow(id));
        }
        for name in anonymous {
            self.refresh(state, ItemKey::File(name));
        }
    }
}

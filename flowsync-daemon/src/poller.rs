//! Remote poller: list, filter, resolve filenames, fetch what changed.
//!
//! A listing failure that looks like a lost connection disables periodic
//! polling. Only an explicit [`SyncEngine::poll_now`] brings it back.

use std::collections::HashSet;
use std::sync::atomic::Ordering;

use serde::Serialize;

use flowsync_core::{ItemKey, RemoteError, SyncEvent, WorkflowId, WorkflowSummary};
use flowsync_sync::files;

use crate::engine::{EngineState, SyncEngine};
use crate::error::EngineError;

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    /// In-scope workflows in the listing.
    pub listed: usize,
    /// Full documents fetched because their marker moved.
    pub fetched: usize,
    /// Fetches that failed and were skipped.
    pub failed: usize,
    /// Identities dropped because the listing no longer has them.
    pub pruned: usize,
}

impl SyncEngine {
    /// Poll the remote right now.
    ///
    /// This is also how a caller recovers after the connection was lost:
    /// success re-enables periodic polling.
    pub async fn poll_now(&self) -> Result<PollReport, EngineError> {
        match self.poll_cycle().await {
            Ok(report) => {
                let was_connected = self.inner.connected.swap(true, Ordering::SeqCst);
                self.inner.polling_enabled.store(true, Ordering::SeqCst);
                if !was_connected && self.inner.started.load(Ordering::SeqCst) {
                    tracing::info!("connection to remote restored");
                    self.emit(SyncEvent::ConnectionRestored);
                }
                tracing::debug!(?report, "poll completed");
                let mut state = self.lock().await;
                self.refresh_all(&mut state);
                Ok(report)
            }
            Err(err) => {
                if err.is_connectivity() {
                    self.mark_disconnected(&err);
                } else {
                    tracing::warn!(error = %err, "remote listing failed");
                }
                Err(err.into())
            }
        }
    }

    pub fn is_polling_enabled(&self) -> bool {
        self.inner.polling_enabled.load(Ordering::SeqCst)
    }

    /// Start a poll in the background unless polling is disabled or the
    /// previous cycle is still running.
    pub(crate) fn spawn_poll(&self) {
        if !self.is_polling_enabled() {
            tracing::debug!("polling disabled; waiting for an explicit poll");
            return;
        }
        if self.inner.poll_in_flight.swap(true, Ordering::SeqCst) {
            tracing::debug!("previous poll still running; skipping tick");
            return;
        }
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(err) = engine.poll_now().await {
                tracing::warn!(error = %err, "scheduled poll failed");
            }
            engine.inner.poll_in_flight.store(false, Ordering::SeqCst);
        });
    }

    fn mark_disconnected(&self, err: &RemoteError) {
        self.inner.polling_enabled.store(false, Ordering::SeqCst);
        if self.inner.connected.swap(false, Ordering::SeqCst) {
            tracing::warn!(error = %err, "lost connection to remote; polling disabled");
            self.emit(SyncEvent::ConnectionLost {
                reason: err.to_string(),
            });
        }
    }

    /// One list-and-fetch pass. Does not broadcast; callers refresh statuses.
    pub(crate) async fn poll_cycle(&self) -> Result<PollReport, RemoteError> {
        let config = &self.inner.config;
        // A listing may only prune identities that existed when it was requested.
        let known_before: HashSet<WorkflowId> = {
            let state = self.lock().await;
            state
                .remote_hashes
                .keys()
                .chain(state.remote_markers.keys())
                .chain(state.unfetched.iter())
                .cloned()
                .collect()
        };
        let listing = self
            .inner
            .remote
            .list_workflows(config.project_id.as_deref())
            .await?;
        let listing: Vec<WorkflowSummary> = listing
            .into_iter()
            .filter(|summary| self.in_scope(summary))
            .collect();

        let mut report = PollReport {
            listed: listing.len(),
            ..PollReport::default()
        };
        let listed: HashSet<WorkflowId> = listing.iter().map(|s| s.id.clone()).collect();

        for summary in &listing {
            let needs_fetch = {
                let mut state = self.lock().await;
                self.resolve_filename(&mut state, summary);
                state.remote_markers.get(&summary.id) != Some(&summary.updated_at)
                    || !state.remote_hashes.contains_key(&summary.id)
            };
            if !needs_fetch {
                continue;
            }

            match self.inner.remote.get_workflow(&summary.id).await {
                Ok(Some(doc)) => {
                    let hash = self.content_hash(&doc);
                    let mut state = self.lock().await;
                    state.remote_hashes.insert(summary.id.clone(), hash);
                    state
                        .remote_markers
                        .insert(summary.id.clone(), summary.updated_at.clone());
                    state.unfetched.remove(&summary.id);
                    report.fetched += 1;
                }
                Ok(None) => {
                    tracing::debug!(id = %summary.id, "listed workflow vanished before fetch");
                }
                Err(err) if err.is_connectivity() => return Err(err),
                Err(err) => {
                    tracing::warn!(id = %summary.id, error = %err, "fetch failed; skipping");
                    self.lock().await.unfetched.insert(summary.id.clone());
                    report.failed += 1;
                }
            }
        }

        let mut state = self.lock().await;
        for id in known_before.iter().filter(|id| !listed.contains(*id)) {
            state.remote_markers.remove(id);
            state.unfetched.remove(id);
            if state.remote_hashes.remove(id).is_some() {
                tracing::info!(%id, "no longer listed remotely");
                report.pruned += 1;
            }
        }

        let resolved: Vec<WorkflowId> = state
            .drifted
            .iter()
            .filter(|id| listed.contains(*id))
            .cloned()
            .collect();
        for id in resolved {
            tracing::info!(%id, "drifted identity is listed remotely; conflict cleared");
            state.drifted.remove(&id);
        }
        Ok(report)
    }

    fn in_scope(&self, summary: &WorkflowSummary) -> bool {
        let config = &self.inner.config;
        if config.active_only && !summary.active {
            return false;
        }
        config.tags.is_empty() || summary.tags.iter().any(|tag| config.tags.contains(tag))
    }

    /// Make sure `summary.id` has a filename: the existing binding, a file
    /// already carrying the identity, or a freshly assigned name.
    fn resolve_filename(&self, state: &mut EngineState, summary: &WorkflowSummary) {
        let id = &summary.id;
        if state.registry.filename_of(id).is_some() {
            return;
        }

        let config = &self.inner.config;
        match files::find_file_with_identity(&config.sync_dir, id, config) {
            Ok(Some(name)) if !state.registry.is_filename_taken(&name) => {
                tracing::debug!(%id, filename = %name, "found local file for remote workflow");
                if !state.local_hashes.contains_key(&name) {
                    if let Some(hash) = self.hash_file(&name) {
                        state.local_hashes.insert(name.clone(), hash);
                    }
                }
                state.tracker.forget(&ItemKey::File(name.clone()));
                state.registry.bind(id.clone(), name);
                return;
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(%id, error = %err, "scan for existing file failed"),
        }

        let assigned = files::assign_filename(&summary.name, id, |candidate| {
            state.registry.is_filename_taken(candidate) || self.path_of(candidate).exists()
        });
        tracing::debug!(%id, filename = %assigned, "assigned filename");
        state.registry.bind(id.clone(), assigned);
    }
}

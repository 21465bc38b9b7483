//! Local observer: turns create/modify/remove notifications for files in the
//! sync directory into hash updates, renames, duplicate resolution, and
//! debounced deletions.
//!
//! A removal is never acted on immediately. It is queued for the debounce
//! window so that a rename (delete + create, in either order) or an editor's
//! atomic save can cancel it first.

use std::collections::HashMap;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use flowsync_core::{ItemKey, SyncEvent, WorkflowId};
use flowsync_sync::files;

use crate::engine::{EngineState, SyncEngine};

#[derive(Debug)]
pub(crate) struct PendingDeletion {
    pub(crate) filename: String,
    pub(crate) identity: Option<WorkflowId>,
    generation: u64,
    token: CancellationToken,
}

#[derive(Debug)]
struct PotentialRename {
    old_filename: String,
    new_filename: String,
    seen_at: Instant,
}

/// Deletions waiting out the debounce window, and renames whose deletion
/// half has not been seen yet.
#[derive(Debug, Default)]
pub(crate) struct PendingOps {
    deletions: HashMap<ItemKey, PendingDeletion>,
    renames: HashMap<WorkflowId, PotentialRename>,
    next_generation: u64,
}

impl PendingOps {
    fn queue_deletion(
        &mut self,
        key: ItemKey,
        filename: &str,
        identity: Option<WorkflowId>,
        token: CancellationToken,
    ) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.deletions.insert(
            key,
            PendingDeletion {
                filename: filename.to_string(),
                identity,
                generation,
                token,
            },
        );
        generation
    }

    pub(crate) fn has_deletion(&self, key: &ItemKey) -> bool {
        self.deletions.contains_key(key)
    }

    /// Cancel the timer for `key`, if any.
    pub(crate) fn cancel_deletion(&mut self, key: &ItemKey) -> Option<PendingDeletion> {
        let pending = self.deletions.remove(key)?;
        pending.token.cancel();
        Some(pending)
    }

    /// Remove the entry for `key` only if it is still the one the timer was
    /// started for.
    fn take_deletion(&mut self, key: &ItemKey, generation: u64) -> Option<PendingDeletion> {
        match self.deletions.get(key) {
            Some(pending) if pending.generation == generation => self.deletions.remove(key),
            _ => None,
        }
    }

    /// An identity-less pending deletion whose last known hash is `hash`.
    fn take_anonymous_match(
        &mut self,
        hash: &str,
        local_hashes: &HashMap<String, String>,
    ) -> Option<String> {
        let key = self
            .deletions
            .iter()
            .filter(|(_, pending)| pending.identity.is_none())
            .find(|(_, pending)| {
                local_hashes.get(&pending.filename).map(String::as_str) == Some(hash)
            })
            .map(|(key, _)| key.clone())?;
        self.cancel_deletion(&key).map(|pending| pending.filename)
    }

    fn record_rename(&mut self, id: WorkflowId, old_filename: &str, new_filename: &str) {
        self.renames.insert(
            id,
            PotentialRename {
                old_filename: old_filename.to_string(),
                new_filename: new_filename.to_string(),
                seen_at: Instant::now(),
            },
        );
    }

    fn prune_renames(&mut self, window: std::time::Duration) {
        let now = Instant::now();
        self.renames
            .retain(|_, rename| now.duration_since(rename.seen_at) <= window);
    }

    /// Consume the potential rename whose old side is `filename`.
    fn take_rename_from(&mut self, filename: &str) -> Option<(WorkflowId, String)> {
        let id = self
            .renames
            .iter()
            .find(|(_, rename)| rename.old_filename == filename)
            .map(|(id, _)| id.clone())?;
        self.renames
            .remove(&id)
            .map(|rename| (id, rename.new_filename))
    }
}

impl SyncEngine {
    /// A workflow file was created or modified.
    pub async fn handle_local_change(&self, filename: &str) {
        if !files::is_workflow_file(filename, &self.inner.config) {
            return;
        }
        let doc = match files::read_workflow_if_exists(&self.path_of(filename)) {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                tracing::debug!(filename, "changed file is already gone");
                return;
            }
            Err(err) => {
                tracing::warn!(filename, error = %err, "skipping unreadable workflow file");
                return;
            }
        };
        let hash = self.content_hash(&doc);

        let mut state = self.lock().await;
        let identity = doc
            .id()
            .or_else(|| state.registry.identity_of(filename).cloned());
        if self.is_muted(filename, identity.as_ref()) {
            tracing::debug!(filename, "ignoring change to muted item");
            return;
        }
        match identity {
            Some(id) => self.on_identified_change(&mut state, id, filename, hash),
            None => self.on_anonymous_change(&mut state, filename, hash),
        }
    }

    /// A workflow file disappeared. The deletion is confirmed only if nothing
    /// claims the item within the debounce window.
    pub async fn handle_local_removal(&self, filename: &str) {
        if !files::is_workflow_file(filename, &self.inner.config) {
            return;
        }
        let window = self.inner.config.debounce_window();
        let mut state = self.lock().await;

        state.pending.prune_renames(window);
        if let Some((id, new_filename)) = state.pending.take_rename_from(filename) {
            tracing::debug!(%id, filename, %new_filename, "deletion completes an earlier rename");
            return;
        }
        if self.path_of(filename).exists() {
            tracing::debug!(filename, "removed file is back");
            return;
        }

        let identity = state.registry.identity_of(filename).cloned();
        if self.is_muted(filename, identity.as_ref()) {
            tracing::debug!(filename, "ignoring removal of muted item");
            return;
        }
        if identity.is_none() && !state.local_hashes.contains_key(filename) {
            return;
        }
        let key = match &identity {
            Some(id) => ItemKey::Workflow(id.clone()),
            None => ItemKey::File(filename.to_string()),
        };
        if state.pending.has_deletion(&key) {
            return;
        }

        let token = self.inner.shutdown.child_token();
        let generation = state
            .pending
            .queue_deletion(key.clone(), filename, identity, token.clone());
        drop(state);
        tracing::debug!(item = %key, ?window, "deletion queued");

        let engine = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(window) => engine.confirm_deletion(key, generation).await,
            }
        });
    }

    fn is_muted(&self, filename: &str, identity: Option<&WorkflowId>) -> bool {
        let mutes = &self.inner.mutes;
        mutes.is_muted(&ItemKey::File(filename.to_string()))
            || identity.is_some_and(|id| mutes.is_muted(&ItemKey::Workflow(id.clone())))
    }

    fn on_identified_change(
        &self,
        state: &mut EngineState,
        id: WorkflowId,
        filename: &str,
        hash: String,
    ) {
        if state.pending.cancel_deletion(&ItemKey::File(filename.to_string())).is_some() {
            tracing::debug!(filename, "file reappeared; deletion cancelled");
        }
        state.tracker.forget(&ItemKey::File(filename.to_string()));

        let bound = state.registry.filename_of(&id).map(str::to_string);
        match bound {
            Some(bound) if bound == filename => {
                if state
                    .pending
                    .cancel_deletion(&ItemKey::Workflow(id.clone()))
                    .is_some()
                {
                    tracing::debug!(%id, filename, "file reappeared; deletion cancelled");
                }
                state.local_hashes.insert(filename.to_string(), hash);
                self.refresh(state, ItemKey::Workflow(id));
            }
            Some(bound) => {
                let deleting = state.pending.has_deletion(&ItemKey::Workflow(id.clone()));
                if self.path_of(&bound).exists() && !deleting {
                    self.resolve_duplicate(state, id, &bound, filename, hash);
                } else {
                    self.apply_rename(state, id, &bound, filename, hash);
                }
            }
            None => self.bind_new_identity(state, id, filename, hash),
        }
    }

    fn apply_rename(
        &self,
        state: &mut EngineState,
        id: WorkflowId,
        old_filename: &str,
        new_filename: &str,
        hash: String,
    ) {
        let completed = state
            .pending
            .cancel_deletion(&ItemKey::Workflow(id.clone()))
            .is_some();
        if !completed {
            // Creation arrived first; swallow the deletion when it lands.
            state.pending.record_rename(id.clone(), old_filename, new_filename);
        }

        state.registry.bind(id.clone(), new_filename);
        state.local_hashes.remove(old_filename);
        state.local_hashes.insert(new_filename.to_string(), hash);

        tracing::info!(%id, old_filename, new_filename, "rename detected");
        self.emit(SyncEvent::Renamed {
            id: Some(id.clone()),
            old_filename: old_filename.to_string(),
            new_filename: new_filename.to_string(),
        });
        self.refresh(state, ItemKey::Workflow(id));
    }

    /// Two files claim `id`. The older file keeps it; the newer one is
    /// rewritten without an identity and becomes local-only.
    fn resolve_duplicate(
        &self,
        state: &mut EngineState,
        id: WorkflowId,
        bound: &str,
        incoming: &str,
        incoming_hash: String,
    ) {
        let incoming_is_older = match (
            files::modified_time(&self.path_of(incoming)),
            files::modified_time(&self.path_of(bound)),
        ) {
            (Some(incoming_at), Some(bound_at)) => incoming_at < bound_at,
            _ => false,
        };
        let (keeper, loser) = if incoming_is_older {
            (incoming, bound)
        } else {
            (bound, incoming)
        };

        let loser_path = self.path_of(loser);
        let stripped = match files::read_workflow(&loser_path) {
            Ok(doc) => doc.without_id(),
            Err(err) => {
                self.emit_error(format!("cannot resolve duplicate {id} in {loser}: {err}"));
                return;
            }
        };
        if let Err(err) = files::write_workflow(&loser_path, &stripped) {
            self.emit_error(format!("cannot strip identity from {loser}: {err}"));
            return;
        }

        let keeper_hash = if keeper == incoming {
            Some(incoming_hash)
        } else {
            state
                .local_hashes
                .get(keeper)
                .cloned()
                .or_else(|| self.hash_file(keeper))
        };
        state.registry.bind(id.clone(), keeper);
        if let Some(hash) = keeper_hash {
            state.local_hashes.insert(keeper.to_string(), hash);
        }
        state
            .local_hashes
            .insert(loser.to_string(), self.content_hash(&stripped));
        state.tracker.forget(&ItemKey::File(keeper.to_string()));

        tracing::warn!(%id, kept = keeper, stripped = loser, "duplicate identity resolved");
        self.emit(SyncEvent::DuplicateResolved {
            id: id.clone(),
            kept_filename: keeper.to_string(),
            stripped: vec![loser.to_string()],
        });
        self.refresh(state, ItemKey::Workflow(id));
        self.refresh(state, ItemKey::File(loser.to_string()));
    }

    fn bind_new_identity(
        &self,
        state: &mut EngineState,
        id: WorkflowId,
        filename: &str,
        hash: String,
    ) {
        let displaced = state.registry.identity_of(filename).cloned();
        if let Some(previous) = &displaced {
            if self.remote_matches_baseline(state, previous) {
                let engine = self.clone();
                let (previous, filename) = (previous.clone(), filename.to_string());
                tokio::spawn(async move {
                    engine.backup_remote_copy(&previous, &filename).await;
                });
            }
            let unknown =
                !state.remote_hashes.contains_key(&id) && self.inner.store.get(&id).is_none();
            if unknown {
                tracing::warn!(
                    %previous,
                    %id,
                    filename,
                    "file now carries an identity nobody knows; flagging conflict"
                );
                state.drifted.insert(id.clone());
            }
        }

        state.registry.bind(id.clone(), filename);
        state.local_hashes.insert(filename.to_string(), hash);
        self.refresh(state, ItemKey::Workflow(id));
        if let Some(previous) = displaced {
            self.refresh(state, ItemKey::Workflow(previous));
        }
    }

    fn on_anonymous_change(&self, state: &mut EngineState, filename: &str, hash: String) {
        let key = ItemKey::File(filename.to_string());
        if state.pending.cancel_deletion(&key).is_some() {
            tracing::debug!(filename, "file reappeared; deletion cancelled");
        } else if !state.local_hashes.contains_key(filename) {
            let renamed_from = state
                .pending
                .take_anonymous_match(&hash, &state.local_hashes);
            if let Some(old_filename) = renamed_from {
                state.local_hashes.remove(&old_filename);
                state
                    .tracker
                    .rekey(&ItemKey::File(old_filename.clone()), key.clone());
                tracing::info!(%old_filename, new_filename = filename, "rename detected");
                self.emit(SyncEvent::Renamed {
                    id: None,
                    old_filename,
                    new_filename: filename.to_string(),
                });
            }
        }
        state.local_hashes.insert(filename.to_string(), hash);
        self.refresh(state, key);
    }

    pub(crate) fn hash_file(&self, filename: &str) -> Option<String> {
        match files::read_workflow(&self.path_of(filename)) {
            Ok(doc) => Some(self.content_hash(&doc)),
            Err(err) => {
                tracing::warn!(filename, error = %err, "cannot hash workflow file");
                None
            }
        }
    }

    async fn confirm_deletion(&self, key: ItemKey, generation: u64) {
        let mut state = self.lock().await;
        let Some(pending) = state.pending.take_deletion(&key, generation) else {
            return;
        };
        if self.path_of(&pending.filename).exists() {
            drop(state);
            tracing::debug!(filename = %pending.filename, "file exists again; deletion dropped");
            self.handle_local_change(&pending.filename).await;
            return;
        }

        let backup_id = pending
            .identity
            .clone()
            .filter(|id| self.remote_matches_baseline(&state, id));
        drop(state);

        if let Some(id) = &backup_id {
            self.backup_remote_copy(id, &pending.filename).await;
        }

        let mut state = self.lock().await;
        if self.path_of(&pending.filename).exists() {
            return;
        }
        state.local_hashes.remove(&pending.filename);
        match pending.identity {
            Some(id) => {
                tracing::info!(%id, filename = %pending.filename, "local deletion confirmed");
                self.refresh(&mut state, ItemKey::Workflow(id));
            }
            None => {
                tracing::info!(filename = %pending.filename, "local-only file deleted");
                self.refresh(&mut state, ItemKey::File(pending.filename));
            }
        }
    }

    /// The remote copy of `id` is exactly what was last synced.
    fn remote_matches_baseline(&self, state: &EngineState, id: &WorkflowId) -> bool {
        self.inner
            .store
            .get(id)
            .is_some_and(|record| state.remote_hashes.get(id) == Some(&record.last_synced_hash))
    }

    async fn backup_remote_copy(&self, id: &WorkflowId, filename: &str) {
        match self.inner.remote.get_workflow(id).await {
            Ok(Some(doc)) => {
                let stored = self.inner.sanitizer.for_storage(&doc).with_id(id);
                if let Err(err) = files::write_backup(&self.inner.config, filename, &stored) {
                    self.emit_error(format!("backup of {id} before deletion failed: {err}"));
                }
            }
            Ok(None) => tracing::debug!(%id, "remote copy already gone; nothing to back up"),
            Err(err) => tracing::warn!(%id, error = %err, "cannot fetch remote copy for backup"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::test_support::{doc, drain, write_doc, Fixture};
    use flowsync_core::SyncStatus;

    #[test]
    fn stale_generation_does_not_take_newer_deletion() {
        let mut pending = PendingOps::default();
        let key = ItemKey::File("A.json".to_string());
        let first = pending.queue_deletion(key.clone(), "A.json", None, CancellationToken::new());
        pending.cancel_deletion(&key);
        let second = pending.queue_deletion(key.clone(), "A.json", None, CancellationToken::new());

        assert!(pending.take_deletion(&key, first).is_none());
        assert!(pending.take_deletion(&key, second).is_some());
    }

    #[test]
    fn cancel_fires_the_token() {
        let mut pending = PendingOps::default();
        let token = CancellationToken::new();
        let key = ItemKey::Workflow(WorkflowId::from("42"));
        pending.queue_deletion(key.clone(), "A.json", None, token.clone());
        pending.cancel_deletion(&key);
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn potential_renames_expire_after_window() {
        let mut pending = PendingOps::default();
        pending.record_rename(WorkflowId::from("42"), "Old.json", "New.json");
        tokio::time::advance(Duration::from_millis(1500)).await;
        pending.prune_renames(Duration::from_millis(1000));
        assert!(pending.take_rename_from("Old.json").is_none());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn edit_after_startup_reports_modified_locally() {
        let fx = Fixture::new();
        fx.engine.start().await.expect("start");
        write_doc(&fx.dir, "Flow.json", &doc("Flow", 1).with_id(&WorkflowId::from("42")));
        fx.remote.put("42", doc("Flow", 1));
        fx.engine.poll_now().await.expect("poll");
        fx.engine
            .commit(&WorkflowId::from("42"), "Flow.json")
            .await
            .expect("commit");

        let mut events = fx.engine.subscribe();
        write_doc(&fx.dir, "Flow.json", &doc("Flow", 2).with_id(&WorkflowId::from("42")));
        fx.engine.handle_local_change("Flow.json").await;

        assert_eq!(
            drain(&mut events),
            vec![SyncEvent::StatusChanged {
                id: Some(WorkflowId::from("42")),
                filename: Some("Flow.json".to_string()),
                status: SyncStatus::ModifiedLocally,
            }]
        );
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn muted_changes_are_ignored() {
        let fx = Fixture::new();
        fx.engine.start().await.expect("start");
        let _guard = fx
            .engine
            .inner
            .mutes
            .acquire(ItemKey::File("Muted.json".to_string()));
        write_doc(&fx.dir, "Muted.json", &doc("Muted", 1));
        fx.engine.handle_local_change("Muted.json").await;
        assert_eq!(fx.engine.status_of_file("Muted.json").await, None);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn unreadable_file_is_skipped() {
        let fx = Fixture::new();
        fx.engine.start().await.expect("start");
        std::fs::write(fx.dir.path().join("Broken.json"), "{ not json").expect("write");
        fx.engine.handle_local_change("Broken.json").await;
        assert_eq!(fx.engine.status_of_file("Broken.json").await, None);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn non_workflow_files_are_ignored() {
        let fx = Fixture::new();
        fx.engine.start().await.expect("start");
        std::fs::write(fx.dir.path().join("notes.txt"), "hello").expect("write");
        fx.engine.handle_local_change("notes.txt").await;
        fx.engine.handle_local_change(".flowsync-state.json").await;
        assert!(fx.engine.snapshot().await.is_empty());
    }
}

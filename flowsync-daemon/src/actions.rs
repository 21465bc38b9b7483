//! Caller-triggered sync actions.
//!
//! Each action mutes the local observer for the item it writes, does its
//! remote call without holding the state lock, and finishes with a commit.
//! Commit is the only path that advances the baseline.

use std::path::PathBuf;

use serde::Serialize;

use flowsync_core::{ItemKey, SyncStatus, WorkflowDocument, WorkflowId};
use flowsync_sync::{files, BaselineRecord};

use crate::engine::SyncEngine;
use crate::error::EngineError;

/// What an action did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Pulled { id: WorkflowId, filename: String },
    Created { id: WorkflowId, filename: String },
    Updated { id: WorkflowId, filename: String },
    /// The status did not allow the action; nothing was touched.
    Skipped { status: Option<SyncStatus> },
}

impl SyncEngine {
    /// Overwrite the local file with the remote document.
    pub async fn pull(
        &self,
        id: &WorkflowId,
        filename: &str,
        status: SyncStatus,
    ) -> Result<ActionOutcome, EngineError> {
        if !matches!(
            status,
            SyncStatus::ExistOnlyRemotely
                | SyncStatus::ModifiedRemotely
                | SyncStatus::InSync
                | SyncStatus::Conflict
        ) {
            tracing::debug!(%id, %status, "pull not applicable");
            return Ok(ActionOutcome::Skipped {
                status: Some(status),
            });
        }

        let _mute = self.inner.mutes.acquire(ItemKey::Workflow(id.clone()));
        let remote = self
            .inner
            .remote
            .get_workflow(id)
            .await?
            .ok_or_else(|| EngineError::RemoteMissing { id: id.clone() })?;
        let stored = self.inner.sanitizer.for_storage(&remote).with_id(id);
        files::write_workflow(&self.path_of(filename), &stored)?;

        {
            let mut state = self.lock().await;
            let hash = self.content_hash(&stored);
            state.registry.bind(id.clone(), filename);
            state.local_hashes.insert(filename.to_string(), hash);
            state.tracker.forget(&ItemKey::File(filename.to_string()));
        }
        self.commit(id, filename).await?;

        tracing::info!(%id, filename, "pulled remote workflow");
        Ok(ActionOutcome::Pulled {
            id: id.clone(),
            filename: filename.to_string(),
        })
    }

    /// Send the local file to the remote, creating it there if it has no
    /// identity yet. A missing `status` is evaluated on the spot.
    pub async fn push(
        &self,
        filename: &str,
        id: Option<&WorkflowId>,
        status: Option<SyncStatus>,
    ) -> Result<ActionOutcome, EngineError> {
        let status = match (status, id) {
            (Some(status), _) => Some(status),
            (None, Some(id)) => self.status_of(id).await,
            (None, None) => None,
        };

        let _file_mute = self
            .inner
            .mutes
            .acquire(ItemKey::File(filename.to_string()));
        let local = files::read_workflow_if_exists(&self.path_of(filename))?.ok_or_else(|| {
            EngineError::LocalMissing {
                filename: filename.to_string(),
            }
        })?;

        match (id, status) {
            (None, _) | (Some(_), Some(SyncStatus::ExistOnlyLocally)) => {
                self.push_create(filename, local, id).await
            }
            (
                Some(id),
                Some(SyncStatus::ModifiedLocally | SyncStatus::InSync | SyncStatus::Conflict),
            ) => self.push_update(id, filename, local).await,
            (Some(id), status) => {
                tracing::debug!(%id, ?status, "push not applicable");
                Ok(ActionOutcome::Skipped { status })
            }
        }
    }

    async fn push_create(
        &self,
        filename: &str,
        local: WorkflowDocument,
        stale_id: Option<&WorkflowId>,
    ) -> Result<ActionOutcome, EngineError> {
        let payload = self.inner.sanitizer.for_upload(&local);
        let created = self.inner.remote.create_workflow(&payload).await?;
        let id = created.id;
        let _id_mute = self.inner.mutes.acquire(ItemKey::Workflow(id.clone()));

        let embedded = local.with_id(&id);
        files::write_workflow(&self.path_of(filename), &embedded)?;

        {
            let mut state = self.lock().await;
            let hash = self.content_hash(&embedded);
            state.registry.bind(id.clone(), filename);
            state.local_hashes.insert(filename.to_string(), hash);
            state.tracker.rekey(
                &ItemKey::File(filename.to_string()),
                ItemKey::Workflow(id.clone()),
            );
        }
        self.commit(&id, filename).await?;

        if let Some(stale) = stale_id.filter(|stale| **stale != id) {
            let mut state = self.lock().await;
            self.refresh(&mut state, ItemKey::Workflow(stale.clone()));
        }

        tracing::info!(%id, filename, "created remote workflow");
        Ok(ActionOutcome::Created {
            id,
            filename: filename.to_string(),
        })
    }

    async fn push_update(
        &self,
        id: &WorkflowId,
        filename: &str,
        local: WorkflowDocument,
    ) -> Result<ActionOutcome, EngineError> {
        let _id_mute = self.inner.mutes.acquire(ItemKey::Workflow(id.clone()));
        let payload = self.inner.sanitizer.for_upload(&local);
        self.inner.remote.update_workflow(id, &payload).await?;
        self.commit(id, filename).await?;

        tracing::info!(%id, filename, "updated remote workflow");
        Ok(ActionOutcome::Updated {
            id: id.clone(),
            filename: filename.to_string(),
        })
    }

    /// Record the current content as the agreed state of `id`.
    ///
    /// Refuses unless the remote document and the local file hash the same.
    /// Committing twice with nothing changed is a no-op.
    pub async fn commit(
        &self,
        id: &WorkflowId,
        filename: &str,
    ) -> Result<BaselineRecord, EngineError> {
        let remote = self
            .inner
            .remote
            .get_workflow(id)
            .await?
            .ok_or_else(|| EngineError::RemoteMissing { id: id.clone() })?;
        let local = files::read_workflow_if_exists(&self.path_of(filename))?.ok_or_else(|| {
            EngineError::LocalMissing {
                filename: filename.to_string(),
            }
        })?;

        let remote_hash = self.content_hash(&remote);
        let local_hash = self.content_hash(&local);
        if remote_hash != local_hash {
            tracing::error!(%id, filename, "commit refused: contents differ");
            return Err(EngineError::HashMismatch {
                id: id.clone(),
                local: local_hash,
                remote: remote_hash,
            });
        }

        let mut state = self.lock().await;
        let record = self.inner.store.upsert(id, &local_hash, filename)?;
        state.registry.bind(id.clone(), filename);
        state.local_hashes.insert(filename.to_string(), local_hash);
        state.remote_hashes.insert(id.clone(), remote_hash);
        state.unfetched.remove(id);
        state.drifted.remove(id);
        self.refresh(&mut state, ItemKey::Workflow(id.clone()));
        Ok(record)
    }

    /// Move a local file into the archive directory. The observer then sees
    /// an ordinary deletion.
    pub async fn archive(&self, filename: &str) -> Result<PathBuf, EngineError> {
        let target = files::archive_file(&self.inner.config, filename)?;
        self.handle_local_removal(filename).await;
        Ok(target)
    }

    /// Drop every trace of `id`: baseline, binding, caches, status.
    pub async fn forget(&self, id: &WorkflowId) -> Result<(), EngineError> {
        let mut state = self.lock().await;
        self.inner.store.remove(id)?;
        if let Some(filename) = state.registry.unbind_id(id) {
            state.local_hashes.remove(&filename);
        }
        let key = ItemKey::Workflow(id.clone());
        state.pending.cancel_deletion(&key);
        state.remote_hashes.remove(id);
        state.remote_markers.remove(id);
        state.unfetched.remove(id);
        state.drifted.remove(id);
        state.tracker.forget(&key);
        tracing::info!(%id, "forgot workflow");
        Ok(())
    }
}

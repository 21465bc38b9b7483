//! The remote collaborator: the handful of already-authenticated calls the
//! engine makes against the workflow REST API.
//!
//! The HTTP client itself lives outside this workspace; [`InMemoryRemote`]
//! is a complete in-process implementation for embedding and tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::types::{WorkflowDocument, WorkflowId, WorkflowSummary};

/// Response of a successful create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedWorkflow {
    pub id: WorkflowId,
}

#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Cheap listing for a project scope (`None` = default project).
    async fn list_workflows(
        &self,
        project: Option<&str>,
    ) -> Result<Vec<WorkflowSummary>, RemoteError>;

    /// Full document, or `None` if the remote has no such workflow.
    async fn get_workflow(&self, id: &WorkflowId) -> Result<Option<WorkflowDocument>, RemoteError>;

    async fn create_workflow(
        &self,
        payload: &WorkflowDocument,
    ) -> Result<CreatedWorkflow, RemoteError>;

    async fn update_workflow(
        &self,
        id: &WorkflowId,
        payload: &WorkflowDocument,
    ) -> Result<WorkflowDocument, RemoteError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredWorkflow {
    document: WorkflowDocument,
    active: bool,
    tags: Vec<String>,
    updated_at: String,
}

#[derive(Debug, Default)]
struct InMemoryState {
    workflows: BTreeMap<WorkflowId, StoredWorkflow>,
    offline: bool,
    failing: HashSet<WorkflowId>,
    revision: u64,
    next_id: u64,
    get_calls: usize,
}

impl InMemoryState {
    fn next_marker(&mut self) -> String {
        self.revision += 1;
        format!("rev-{}", self.revision)
    }

    fn ensure_online(&self) -> Result<(), RemoteError> {
        if self.offline {
            return Err(RemoteError::Connectivity("connection refused".to_string()));
        }
        Ok(())
    }
}

/// A single-project remote held entirely in memory.
///
/// The project scope passed to [`RemoteApi::list_workflows`] is ignored.
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    state: Mutex<InMemoryState>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `document` under `id`, bumping its last-modified marker.
    pub fn put(&self, id: impl Into<WorkflowId>, document: WorkflowDocument) {
        let id = id.into();
        let mut state = self.lock();
        let updated_at = state.next_marker();
        let (active, tags) = state
            .workflows
            .get(&id)
            .map(|w| (w.active, w.tags.clone()))
            .unwrap_or((false, Vec::new()));
        state.workflows.insert(
            id.clone(),
            StoredWorkflow {
                document: document.with_id(&id),
                active,
                tags,
                updated_at,
            },
        );
    }

    pub fn remove(&self, id: &WorkflowId) -> Option<WorkflowDocument> {
        self.lock().workflows.remove(id).map(|w| w.document)
    }

    pub fn document(&self, id: &WorkflowId) -> Option<WorkflowDocument> {
        self.lock().workflows.get(id).map(|w| w.document.clone())
    }

    pub fn set_active(&self, id: &WorkflowId, active: bool) {
        if let Some(w) = self.lock().workflows.get_mut(id) {
            w.active = active;
        }
    }

    pub fn set_tags(&self, id: &WorkflowId, tags: &[&str]) {
        if let Some(w) = self.lock().workflows.get_mut(id) {
            w.tags = tags.iter().map(|t| t.to_string()).collect();
        }
    }

    /// Simulate a network outage: every call fails with a connectivity error.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Make `get_workflow` fail with an API error for `id`.
    pub fn fail_fetch(&self, id: &WorkflowId, failing: bool) {
        let mut state = self.lock();
        if failing {
            state.failing.insert(id.clone());
        } else {
            state.failing.remove(id);
        }
    }

    /// Number of `get_workflow` calls served so far.
    pub fn get_calls(&self) -> usize {
        self.lock().get_calls
    }
}

#[async_trait]
impl RemoteApi for InMemoryRemote {
    async fn list_workflows(
        &self,
        _project: Option<&str>,
    ) -> Result<Vec<WorkflowSummary>, RemoteError> {
        let state = self.lock();
        state.ensure_online()?;
        Ok(state
            .workflows
            .iter()
            .map(|(id, w)| WorkflowSummary {
                id: id.clone(),
                name: w.document.name().unwrap_or_default().to_string(),
                active: w.active,
                updated_at: w.updated_at.clone(),
                tags: w.tags.clone(),
            })
            .collect())
    }

    async fn get_workflow(&self, id: &WorkflowId) -> Result<Option<WorkflowDocument>, RemoteError> {
        let mut state = self.lock();
        state.ensure_online()?;
        state.get_calls += 1;
        if state.failing.contains(id) {
            return Err(RemoteError::Api(format!("fetch of {id} failed")));
        }
        Ok(state.workflows.get(id).map(|w| w.document.clone()))
    }

    async fn create_workflow(
        &self,
        payload: &WorkflowDocument,
    ) -> Result<CreatedWorkflow, RemoteError> {
        let mut state = self.lock();
        state.ensure_online()?;
        state.next_id += 1;
        let id = WorkflowId(format!("mem{:05}", state.next_id));
        let updated_at = state.next_marker();
        state.workflows.insert(
            id.clone(),
            StoredWorkflow {
                document: payload.with_id(&id),
                active: false,
                tags: Vec::new(),
                updated_at,
            },
        );
        Ok(CreatedWorkflow { id })
    }

    async fn update_workflow(
        &self,
        id: &WorkflowId,
        payload: &WorkflowDocument,
    ) -> Result<WorkflowDocument, RemoteError> {
        let mut state = self.lock();
        state.ensure_online()?;
        let updated_at = state.next_marker();
        let Some(stored) = state.workflows.get_mut(id) else {
            return Err(RemoteError::Api(format!("workflow {id} not found")));
        };
        stored.document = payload.with_id(id);
        stored.updated_at = updated_at;
        Ok(stored.document.clone())
    }
}

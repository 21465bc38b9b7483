//! Identity/filename registry.
//!
//! In-memory, bidirectional, one-to-one. Seeded from the baseline at
//! startup; after that every mutation path goes through [`IdentityRegistry::bind`]
//! and the unbind calls, which keep both directions consistent.

use std::collections::HashMap;

use flowsync_core::WorkflowId;

use crate::state_store::StateFile;

#[derive(Debug, Clone, Default)]
pub struct IdentityRegistry {
    by_id: HashMap<WorkflowId, String>,
    by_file: HashMap<String, WorkflowId>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `id` to `filename`, dropping any previous binding of either side.
    pub fn bind(&mut self, id: WorkflowId, filename: impl Into<String>) {
        let filename = filename.into();
        if let Some(old_file) = self.by_id.remove(&id) {
            self.by_file.remove(&old_file);
        }
        if let Some(old_id) = self.by_file.remove(&filename) {
            self.by_id.remove(&old_id);
        }
        self.by_file.insert(filename.clone(), id.clone());
        self.by_id.insert(id, filename);
    }

    /// Remove the binding for `filename`, returning its identity.
    pub fn unbind(&mut self, filename: &str) -> Option<WorkflowId> {
        let id = self.by_file.remove(filename)?;
        self.by_id.remove(&id);
        Some(id)
    }

    /// Remove the binding for `id`, returning its filename.
    pub fn unbind_id(&mut self, id: &WorkflowId) -> Option<String> {
        let filename = self.by_id.remove(id)?;
        self.by_file.remove(&filename);
        Some(filename)
    }

    pub fn filename_of(&self, id: &WorkflowId) -> Option<&str> {
        self.by_id.get(id).map(String::as_str)
    }

    pub fn identity_of(&self, filename: &str) -> Option<&WorkflowId> {
        self.by_file.get(filename)
    }

    pub fn is_filename_taken(&self, filename: &str) -> bool {
        self.by_file.contains_key(filename)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&WorkflowId, &str)> {
        self.by_id.iter().map(|(id, f)| (id, f.as_str()))
    }

    /// Bind every baseline record that has a filename, unless the identity
    /// or the filename is already bound in this session.
    ///
    /// Returns how many bindings were restored.
    pub fn restore_from_baseline(&mut self, state: &StateFile) -> usize {
        let mut restored = 0;
        for (id, record) in &state.workflows {
            if record.filename.is_empty() {
                continue;
            }
            if self.by_id.contains_key(id) || self.by_file.contains_key(&record.filename) {
                tracing::debug!(
                    "keeping session binding over baseline for {id} ({})",
                    record.filename
                );
                continue;
            }
            self.bind(id.clone(), record.filename.clone());
            restored += 1;
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::BaselineRecord;
    use chrono::Utc;

    fn id(s: &str) -> WorkflowId {
        WorkflowId::from(s)
    }

    fn record(filename: &str) -> BaselineRecord {
        BaselineRecord {
            last_synced_hash: "h".to_string(),
            last_synced_at: Utc::now(),
            filename: filename.to_string(),
        }
    }

    #[test]
    fn bind_is_bidirectional() {
        let mut reg = IdentityRegistry::new();
        reg.bind(id("1"), "A.json");
        assert_eq!(reg.filename_of(&id("1")), Some("A.json"));
        assert_eq!(reg.identity_of("A.json"), Some(&id("1")));
    }

    #[test]
    fn rebinding_identity_frees_old_filename() {
        let mut reg = IdentityRegistry::new();
        reg.bind(id("1"), "Old.json");
        reg.bind(id("1"), "New.json");
        assert_eq!(reg.identity_of("Old.json"), None);
        assert_eq!(reg.filename_of(&id("1")), Some("New.json"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn binding_taken_filename_displaces_previous_identity() {
        let mut reg = IdentityRegistry::new();
        reg.bind(id("1"), "A.json");
        reg.bind(id("2"), "A.json");
        assert_eq!(reg.filename_of(&id("1")), None);
        assert_eq!(reg.identity_of("A.json"), Some(&id("2")));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn unbind_both_directions() {
        let mut reg = IdentityRegistry::new();
        reg.bind(id("1"), "A.json");
        reg.bind(id("2"), "B.json");
        assert_eq!(reg.unbind("A.json"), Some(id("1")));
        assert_eq!(reg.unbind_id(&id("2")), Some("B.json".to_string()));
        assert!(reg.is_empty());
    }

    #[test]
    fn restore_does_not_override_session_bindings() {
        let mut state = StateFile::default();
        state.workflows.insert(id("1"), record("Report.json"));
        state.workflows.insert(id("2"), record("Report_2.json"));
        state.workflows.insert(id("3"), record(""));

        let mut reg = IdentityRegistry::new();
        reg.bind(id("1"), "Renamed.json");

        let restored = reg.restore_from_baseline(&state);
        assert_eq!(restored, 1);
        assert_eq!(reg.filename_of(&id("1")), Some("Renamed.json"));
        assert_eq!(reg.filename_of(&id("2")), Some("Report_2.json"));
        assert_eq!(reg.filename_of(&id("3")), None);
    }
}

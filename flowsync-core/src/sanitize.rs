//! The sanitizer collaborator: which projection of a document is stored,
//! hashed, or uploaded.

use crate::types::WorkflowDocument;

pub trait Sanitizer: Send + Sync {
    /// Strip non-semantic and volatile fields before hashing or comparison.
    fn for_hashing(&self, doc: &WorkflowDocument) -> WorkflowDocument;

    /// The projection written to local files.
    fn for_storage(&self, doc: &WorkflowDocument) -> WorkflowDocument;

    /// The projection sent to the remote API.
    fn for_upload(&self, doc: &WorkflowDocument) -> WorkflowDocument;
}

/// Server-managed fields that never belong in a local file.
const SERVER_FIELDS: &[&str] = &[
    "createdAt",
    "updatedAt",
    "versionId",
    "triggerCount",
    "shared",
    "isArchived",
];

/// Fields that change without the workflow meaning anything different.
const VOLATILE_FIELDS: &[&str] = &["id", "pinData", "staticData", "meta", "active", "tags"];

/// Fields the API rejects on create/update.
const READ_ONLY_FIELDS: &[&str] = &["id", "active", "tags"];

/// Default sanitizer: removes fixed sets of top-level keys.
#[derive(Debug, Clone)]
pub struct FieldSanitizer {
    server: Vec<String>,
    volatile: Vec<String>,
    read_only: Vec<String>,
}

impl Default for FieldSanitizer {
    fn default() -> Self {
        let owned = |keys: &[&str]| keys.iter().map(|k| k.to_string()).collect();
        Self {
            server: owned(SERVER_FIELDS),
            volatile: owned(VOLATILE_FIELDS),
            read_only: owned(READ_ONLY_FIELDS),
        }
    }
}

impl FieldSanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `key` as volatile in addition to the defaults.
    pub fn with_volatile(mut self, key: impl Into<String>) -> Self {
        self.volatile.push(key.into());
        self
    }

    fn strip(doc: &WorkflowDocument, keys: &[String]) -> WorkflowDocument {
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        doc.without_fields(&keys)
    }
}

impl Sanitizer for FieldSanitizer {
    fn for_hashing(&self, doc: &WorkflowDocument) -> WorkflowDocument {
        Self::strip(&Self::strip(doc, &self.server), &self.volatile)
    }

    fn for_storage(&self, doc: &WorkflowDocument) -> WorkflowDocument {
        Self::strip(doc, &self.server)
    }

    fn for_upload(&self, doc: &WorkflowDocument) -> WorkflowDocument {
        Self::strip(&Self::strip(doc, &self.server), &self.read_only)
    }
}

//! Domain types for the flowsync engine.
//!
//! Workflow documents stay opaque JSON; the engine only ever extracts the
//! identity and the display name from them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// The remote-assigned, stable identity of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First `n` characters, used to disambiguate colliding filenames.
    pub fn prefix(&self, n: usize) -> &str {
        match self.0.char_indices().nth(n) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for WorkflowId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkflowId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// What a status or notification is attached to: a known identity, or a
/// local file that has no identity yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKey {
    Workflow(WorkflowId),
    File(String),
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKey::Workflow(id) => write!(f, "workflow:{id}"),
            ItemKey::File(name) => write!(f, "file:{name}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Derived synchronization state of one item. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    InSync,
    ModifiedLocally,
    ModifiedRemotely,
    Conflict,
    ExistOnlyLocally,
    ExistOnlyRemotely,
    DeletedLocally,
    DeletedRemotely,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::InSync => "IN_SYNC",
            SyncStatus::ModifiedLocally => "MODIFIED_LOCALLY",
            SyncStatus::ModifiedRemotely => "MODIFIED_REMOTELY",
            SyncStatus::Conflict => "CONFLICT",
            SyncStatus::ExistOnlyLocally => "EXIST_ONLY_LOCALLY",
            SyncStatus::ExistOnlyRemotely => "EXIST_ONLY_REMOTELY",
            SyncStatus::DeletedLocally => "DELETED_LOCALLY",
            SyncStatus::DeletedRemotely => "DELETED_REMOTELY",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// One entry of the cheap remote listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub active: bool,
    /// Last-modified marker; compared verbatim, never parsed.
    pub updated_at: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A full workflow document: an opaque JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowDocument(Value);

impl WorkflowDocument {
    pub const ID_FIELD: &'static str = "id";
    pub const NAME_FIELD: &'static str = "name";

    /// Wrap a JSON value. Anything but an object is rejected.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        if value.is_object() {
            Ok(Self(value))
        } else {
            Err(serde::de::Error::custom("workflow document must be a JSON object"))
        }
    }

    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        Self::from_value(serde_json::from_str(raw)?)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    fn fields(&self) -> Option<&Map<String, Value>> {
        self.0.as_object()
    }

    /// Embedded identity, if any. Empty strings count as absent.
    pub fn id(&self) -> Option<WorkflowId> {
        match self.fields()?.get(Self::ID_FIELD)? {
            Value::String(s) if !s.trim().is_empty() => Some(WorkflowId(s.clone())),
            Value::Number(n) => Some(WorkflowId(n.to_string())),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.fields()?.get(Self::NAME_FIELD)?.as_str()
    }

    /// Copy of this document with `id` set to `id`.
    pub fn with_id(&self, id: &WorkflowId) -> Self {
        let mut value = self.0.clone();
        if let Some(map) = value.as_object_mut() {
            map.insert(Self::ID_FIELD.to_string(), Value::String(id.0.clone()));
        }
        Self(value)
    }

    /// Copy of this document with the identity field removed.
    pub fn without_id(&self) -> Self {
        self.without_fields(&[Self::ID_FIELD])
    }

    /// Copy of this document with the given top-level keys removed.
    pub fn without_fields(&self, keys: &[&str]) -> Self {
        let mut value = self.0.clone();
        if let Some(map) = value.as_object_mut() {
            for key in keys {
                map.remove(*key);
            }
        }
        Self(value)
    }

    /// Pretty JSON with a trailing newline, the on-disk form.
    pub fn to_pretty_json(&self) -> Result<String, serde_json::Error> {
        let mut out = serde_json::to_string_pretty(&self.0)?;
        out.push('\n');
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Outbound notifications consumed by whatever embeds the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    StatusChanged {
        id: Option<WorkflowId>,
        filename: Option<String>,
        status: SyncStatus,
    },
    Renamed {
        id: Option<WorkflowId>,
        old_filename: String,
        new_filename: String,
    },
    DuplicateResolved {
        id: WorkflowId,
        kept_filename: String,
        stripped: Vec<String>,
    },
    ConnectionLost {
        reason: String,
    },
    ConnectionRestored,
    Error {
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn newtype_display_and_prefix() {
        let id = WorkflowId::from("33334444abcd");
        assert_eq!(id.to_string(), "33334444abcd");
        assert_eq!(id.prefix(8), "33334444");
        assert_eq!(WorkflowId::from("abc").prefix(8), "abc");
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let encoded = serde_json::to_string(&SyncStatus::ExistOnlyRemotely).expect("encode");
        assert_eq!(encoded, "\"EXIST_ONLY_REMOTELY\"");
        assert_eq!(SyncStatus::DeletedLocally.to_string(), "DELETED_LOCALLY");
    }

    #[test]
    fn document_extracts_id_and_name() {
        let doc = WorkflowDocument::parse(r#"{"id":"42","name":"Invoice","nodes":[]}"#)
            .expect("parse");
        assert_eq!(doc.id(), Some(WorkflowId::from("42")));
        assert_eq!(doc.name(), Some("Invoice"));
    }

    #[test]
    fn empty_or_missing_id_is_absent() {
        let doc = WorkflowDocument::from_value(json!({"id": "  ", "name": "x"})).expect("doc");
        assert_eq!(doc.id(), None);
        let doc = WorkflowDocument::from_value(json!({"name": "x"})).expect("doc");
        assert_eq!(doc.id(), None);
    }

    #[test]
    fn non_object_documents_are_rejected() {
        assert!(WorkflowDocument::parse("[1,2,3]").is_err());
        assert!(WorkflowDocument::parse("not json").is_err());
    }

    #[test]
    fn with_id_and_without_id() {
        let doc = WorkflowDocument::from_value(json!({"name": "x"})).expect("doc");
        let with = doc.with_id(&WorkflowId::from("7"));
        assert_eq!(with.id(), Some(WorkflowId::from("7")));
        assert_eq!(with.without_id(), doc);
    }

    #[test]
    fn summary_uses_camel_case_marker() {
        let summary: WorkflowSummary = serde_json::from_value(json!({
            "id": "1",
            "name": "Report",
            "updatedAt": "2024-01-01T00:00:00Z"
        }))
        .expect("summary");
        assert!(!summary.active);
        assert!(summary.tags.is_empty());
        assert_eq!(summary.updated_at, "2024-01-01T00:00:00Z");
    }
}

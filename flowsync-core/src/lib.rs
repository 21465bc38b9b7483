//! flowsync core library: domain types, collaborator traits, config and errors.
//!
//! Public API surface:
//! - [`types`]: identity newtype, sync status, documents, notifications
//! - [`remote`]: the [`RemoteApi`] collaborator and an in-memory implementation
//! - [`sanitize`]: the [`Sanitizer`] collaborator and a field-stripping default
//! - [`config`]: YAML engine configuration
//! - [`error`]: [`RemoteError`], [`ConfigError`]

pub mod config;
pub mod error;
pub mod remote;
pub mod sanitize;
pub mod types;

pub use config::EngineConfig;
pub use error::{ConfigError, RemoteError};
pub use remote::{CreatedWorkflow, InMemoryRemote, RemoteApi};
pub use sanitize::{FieldSanitizer, Sanitizer};
pub use types::{ItemKey, SyncEvent, SyncStatus, WorkflowDocument, WorkflowId, WorkflowSummary};

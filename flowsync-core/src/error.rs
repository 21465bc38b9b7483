//! Error types for flowsync-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::WorkflowId;

/// Errors surfaced by a [`crate::RemoteApi`] implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Connection refused, timed out, host not found, and similar.
    #[error("remote unreachable: {0}")]
    Connectivity(String),

    /// The remote rejected or failed a request.
    #[error("remote API error: {0}")]
    Api(String),

    /// A response did not have the expected shape.
    #[error("malformed remote response for {id}: {reason}")]
    Malformed { id: WorkflowId, reason: String },
}

impl RemoteError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, RemoteError::Connectivity(_))
    }
}

/// Errors from loading engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error, with the offending file.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config not found at {path}")]
    NotFound { path: PathBuf },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    #[error("invalid config: {0}")]
    Invalid(String),
}

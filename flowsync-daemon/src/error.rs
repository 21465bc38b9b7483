use std::path::PathBuf;

use thiserror::Error;

use flowsync_core::{ConfigError, RemoteError, WorkflowId};
use flowsync_sync::SyncError;

/// Error surface for the engine, its sync actions, and the runtime loop.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The mandatory first poll could not reach the remote.
    #[error("cannot start without the remote: {0}")]
    ConnectivityAtStartup(String),

    #[error("commit of {id} failed: remote document is missing")]
    RemoteMissing { id: WorkflowId },

    #[error("commit failed: local file {filename} is missing")]
    LocalMissing { filename: String },

    /// Both sides were expected to match after a write, and do not.
    #[error("commit of {id} refused: local hash {local} differs from remote hash {remote}")]
    HashMismatch {
        id: WorkflowId,
        local: String,
        remote: String,
    },

    #[error("runtime error: {0}")]
    Runtime(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> EngineError {
    EngineError::Io {
        path: path.into(),
        source,
    }
}

//! # flowsync-sync
//!
//! Synchronous building blocks of the reconciliation core: canonical hashing,
//! the durable baseline store, the identity/filename registry, the status
//! decision table, the mute registry, and workflow file I/O.
//!
//! Nothing in here talks to the network; the async engine in
//! `flowsync-daemon` composes these pieces.

pub mod error;
pub mod files;
pub mod hasher;
pub mod mute;
pub mod registry;
pub mod state_store;
pub mod status;

pub use error::SyncError;
pub use hasher::{canonical_json, hash_document};
pub use mute::{MuteGuard, MuteRegistry};
pub use registry::IdentityRegistry;
pub use state_store::{BaselineRecord, StateFile, StateStore};
pub use status::{classify, StatusTracker};

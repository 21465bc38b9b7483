//! # flowsync-daemon
//!
//! The async reconciliation engine: local observer, remote poller, status
//! broadcasts, sync actions, and the watcher/poll runtime that drives them.

mod actions;
mod engine;
mod error;
mod observer;
mod poller;
mod runtime;

#[cfg(test)]
mod test_support;

pub use actions::ActionOutcome;
pub use engine::{ItemStatus, SyncEngine};
pub use error::EngineError;
pub use poller::PollReport;
pub use runtime::{run, start_blocking};

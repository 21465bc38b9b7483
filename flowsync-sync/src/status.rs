//! Status engine.
//!
//! [`classify`] is the three-way decision table every other behavior builds
//! on. Rule order matters:
//!
//! 1. `EXIST_ONLY_LOCALLY` (local only, no baseline)
//! 2. `EXIST_ONLY_REMOTELY` (remote only, no baseline)
//! 3. `IN_SYNC` (both present and equal)
//! 4. `DELETED_LOCALLY` (baseline, local gone, remote untouched)
//! 5. `DELETED_REMOTELY` (baseline, remote gone, local untouched)
//! 6. `CONFLICT` (both moved away from baseline)
//! 7. `MODIFIED_LOCALLY`
//! 8. `MODIFIED_REMOTELY`
//! 9. `CONFLICT` for anything else
//!
//! An absent hash counts as "different from the baseline".

use std::collections::HashMap;

use flowsync_core::{ItemKey, SyncStatus};

/// Decide the status from local, remote, and baseline hashes.
///
/// Returns `None` when all three are absent: there is nothing to report.
pub fn classify(
    local: Option<&str>,
    remote: Option<&str>,
    baseline: Option<&str>,
) -> Option<SyncStatus> {
    let status = match (local, remote, baseline) {
        (None, None, None) => return None,
        (Some(_), None, None) => SyncStatus::ExistOnlyLocally,
        (None, Some(_), None) => SyncStatus::ExistOnlyRemotely,
        (Some(l), Some(r), _) if l == r => SyncStatus::InSync,
        (None, Some(r), Some(b)) if r == b => SyncStatus::DeletedLocally,
        (Some(l), None, Some(b)) if l == b => SyncStatus::DeletedRemotely,
        (l, r, Some(b)) => {
            let local_moved = l != Some(b);
            let remote_moved = r != Some(b);
            match (local_moved, remote_moved) {
                (true, true) => SyncStatus::Conflict,
                (true, false) => SyncStatus::ModifiedLocally,
                (false, true) => SyncStatus::ModifiedRemotely,
                // Both equal to the baseline is caught by IN_SYNC above.
                (false, false) => SyncStatus::InSync,
            }
        }
        _ => SyncStatus::Conflict,
    };
    Some(status)
}

/// Remembers the last status broadcast per item so callers only emit on
/// change.
#[derive(Debug, Clone, Default)]
pub struct StatusTracker {
    last: HashMap<ItemKey, SyncStatus>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `status` for `key`. Returns `true` if it differs from the last
    /// recorded value (or there was none).
    pub fn observe(&mut self, key: ItemKey, status: SyncStatus) -> bool {
        match self.last.insert(key, status) {
            Some(previous) => previous != status,
            None => true,
        }
    }

    pub fn last(&self, key: &ItemKey) -> Option<SyncStatus> {
        self.last.get(key).copied()
    }

    pub fn forget(&mut self, key: &ItemKey) -> Option<SyncStatus> {
        self.last.remove(key)
    }

    /// Move the remembered status from `from` to `to`.
    pub fn rekey(&mut self, from: &ItemKey, to: ItemKey) {
        if let Some(status) = self.last.remove(from) {
            self.last.insert(to, status);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ItemKey, SyncStatus)> {
        self.last.iter().map(|(k, s)| (k, *s))
    }
}

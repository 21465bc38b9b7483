//! Mute registry.
//!
//! Sync actions mute the local observer for the item they are about to write
//! so their own write is not mistaken for an independent edit. Mutes are
//! reference counted and released when the [`MuteGuard`] drops, including on
//! early return or error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use flowsync_core::ItemKey;

#[derive(Debug, Clone, Default)]
pub struct MuteRegistry {
    counts: Arc<Mutex<HashMap<ItemKey, usize>>>,
}

impl MuteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ItemKey, usize>> {
        self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mute `key` until the returned guard drops.
    pub fn acquire(&self, key: ItemKey) -> MuteGuard {
        *self.lock().entry(key.clone()).or_insert(0) += 1;
        tracing::debug!("muted {key}");
        MuteGuard {
            registry: self.clone(),
            key,
        }
    }

    pub fn is_muted(&self, key: &ItemKey) -> bool {
        self.lock().get(key).is_some_and(|count| *count > 0)
    }

    fn release(&self, key: &ItemKey) {
        let mut counts = self.lock();
        if let Some(count) = counts.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(key);
                tracing::debug!("unmuted {key}");
            }
        }
    }
}

/// Holds one mute on an item.
#[derive(Debug)]
pub struct MuteGuard {
    registry: MuteRegistry,
    key: ItemKey,
}

impl MuteGuard {
    pub fn key(&self) -> &ItemKey {
        &self.key
    }
}

impl Drop for MuteGuard {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsync_core::WorkflowId;

    fn key() -> ItemKey {
        ItemKey::Workflow(WorkflowId::from("42"))
    }

    #[test]
    fn guard_mutes_until_dropped() {
        let mutes = MuteRegistry::new();
        let guard = mutes.acquire(key());
        assert!(mutes.is_muted(&key()));
        drop(guard);
        assert!(!mutes.is_muted(&key()));
    }

    #[test]
    fn nested_mutes_do_not_unmute_early() {
        let mutes = MuteRegistry::new();
        let outer = mutes.acquire(key());
        let inner = mutes.acquire(key());
        drop(inner);
        assert!(mutes.is_muted(&key()), "outer mute still held");
        drop(outer);
        assert!(!mutes.is_muted(&key()));
    }

    #[test]
    fn failed_action_releases_mute() {
        fn failing(mutes: &MuteRegistry) -> Result<(), String> {
            let _guard = mutes.acquire(key());
            Err("boom".to_string())
        }
        let mutes = MuteRegistry::new();
        assert!(failing(&mutes).is_err());
        assert!(!mutes.is_muted(&key()));
    }

    #[test]
    fn other_items_are_unaffected() {
        let mutes = MuteRegistry::new();
        let _guard = mutes.acquire(key());
        assert!(!mutes.is_muted(&ItemKey::File("Other.json".to_string())));
    }
}

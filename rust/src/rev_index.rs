//! Reverse subscription index: watch key id → watchers that read it.
//!
//! Lets a commit find the watchers affected by the cells it wrote in O(1)
//! average per written key, so views nobody subscribed to are never
//! recomputed.

use crate::intern::KeyId;
use std::collections::{HashMap, HashSet};

/// Identifier of one live view (field watch, column watch, field binding deps).
pub type WatcherId = u32;

#[derive(Debug, Default)]
pub(crate) struct SubscriptionIndex {
    /// key_id -> set of watcher_ids
    key_to_watchers: HashMap<KeyId, HashSet<WatcherId>>,
    /// watcher_id -> set of key_ids (for cleanup and resubscription)
    watcher_to_keys: HashMap<WatcherId, HashSet<KeyId>>,
}

impl SubscriptionIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Replace the key set a watcher depends on. Returns the keys that no
    /// watcher reads anymore.
    pub(crate) fn set(&mut self, watcher_id: WatcherId, key_ids: HashSet<KeyId>) -> Vec<KeyId> {
        let mut orphaned = self.remove(watcher_id);
        orphaned.retain(|key_id| !key_ids.contains(key_id));
        for &key_id in &key_ids {
            self.key_to_watchers
                .entry(key_id)
                .or_default()
                .insert(watcher_id);
        }
        self.watcher_to_keys.insert(watcher_id, key_ids);
        orphaned
    }

    /// Remove a watcher and all its reverse entries. Returns the keys that
    /// lost their last watcher.
    pub(crate) fn remove(&mut self, watcher_id: WatcherId) -> Vec<KeyId> {
        let mut orphaned = Vec::new();
        if let Some(key_ids) = self.watcher_to_keys.remove(&watcher_id) {
            for key_id in key_ids {
                if let Some(set) = self.key_to_watchers.get_mut(&key_id) {
                    set.remove(&watcher_id);
                    if set.is_empty() {
                        self.key_to_watchers.remove(&key_id);
                        orphaned.push(key_id);
                    }
                }
            }
        }
        orphaned
    }

    /// Watchers subscribed to `key_id`.
    pub(crate) fn watchers_of(&self, key_id: KeyId) -> impl Iterator<Item = WatcherId> + '_ {
        self.key_to_watchers
            .get(&key_id)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Number of keys with at least one watcher.
    #[cfg(test)]
    pub(crate) fn key_count(&self) -> usize {
        self.key_to_watchers.len()
    }
}

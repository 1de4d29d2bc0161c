//! Hybrid store manager
//!
//! Records, per event partition, whether the temporary store mirrors it and
//! from which cursor. The map is split into lock shards so upserts on
//! different partitions rarely contend; each upsert is atomic for its key.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use parking_lot::RwLock;
use tracing::debug;

use crate::types::OrderingKey;

const SHARD_COUNT: usize = 16;

/// Mirror guarantee for one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HybridStatus {
    /// The temporary store holds every event of the partition
    pub from_initial: bool,
    /// Events strictly after this key are mirrored (`None` with `from_initial`)
    pub cursor: Option<OrderingKey>,
}

impl HybridStatus {
    pub fn from_initial() -> Self {
        Self {
            from_initial: true,
            cursor: None,
        }
    }

    pub fn since(cursor: OrderingKey) -> Self {
        Self {
            from_initial: false,
            cursor: Some(cursor),
        }
    }
}

/// Per-partition cache bookkeeping, injected into the split repository/writer
#[derive(Debug)]
pub struct HybridStoreManager {
    enabled: bool,
    shards: Vec<RwLock<HashMap<String, HybridStatus>>>,
}

impl Default for HybridStoreManager {
    fn default() -> Self {
        Self::new(true)
    }
}

impl HybridStoreManager {
    /// Create a manager; a disabled one answers every query negatively
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn shard(&self, partition_key: &str) -> &RwLock<HashMap<String, HybridStatus>> {
        let mut hasher = DefaultHasher::new();
        partition_key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Whether the partition has any mirror guarantee
    pub fn has_partition(&self, partition_key: &str) -> bool {
        self.enabled && self.shard(partition_key).read().contains_key(partition_key)
    }

    /// Record a guarantee, overwriting any previous one (last write wins)
    ///
    /// Only call once the temporary store actually holds the claimed range.
    /// An empty cursor is treated as no cursor.
    pub fn add_partition_key(&self, partition_key: &str, cursor: Option<OrderingKey>, from_initial: bool) -> bool {
        if !self.enabled {
            return false;
        }
        let cursor = cursor.filter(|c| !c.as_str().is_empty());
        self.shard(partition_key).write().insert(
            partition_key.to_string(),
            HybridStatus { from_initial, cursor },
        );
        true
    }

    /// Recorded cursor, if any
    pub fn cursor_for(&self, partition_key: &str) -> Option<OrderingKey> {
        self.status_for(partition_key).and_then(|status| status.cursor)
    }

    /// Whether the partition is mirrored from its first event
    pub fn from_initial_for(&self, partition_key: &str) -> bool {
        self.status_for(partition_key).is_some_and(|status| status.from_initial)
    }

    pub fn status_for(&self, partition_key: &str) -> Option<HybridStatus> {
        if !self.enabled {
            return None;
        }
        self.shard(partition_key).read().get(partition_key).cloned()
    }

    /// Record a backfill result only if it proves more than the current status
    ///
    /// - `since == None` (full backfill) always records `from_initial`.
    /// - `since == Some(k)` records `k` when nothing is recorded, or when the
    ///   partition is not `from_initial` and `k` is later than the recorded
    ///   cursor. A `from_initial` partition is never downgraded.
    ///
    /// Compare and write happen under one shard lock. Returns whether the
    /// status changed.
    pub fn improve_partition(&self, partition_key: &str, since: Option<&OrderingKey>) -> bool {
        if !self.enabled {
            return false;
        }
        let since = since.filter(|k| !k.as_str().is_empty());
        let mut shard = self.shard(partition_key).write();
        let current = shard.get(partition_key);

        let next = match (since, current) {
            (None, Some(status)) if status.from_initial => None,
            (None, _) => Some(HybridStatus::from_initial()),
            (Some(since), None) => Some(HybridStatus::since(since.clone())),
            (Some(_), Some(status)) if status.from_initial => None,
            (Some(since), Some(status)) => match &status.cursor {
                Some(cursor) if since <= cursor => None,
                _ => Some(HybridStatus::since(since.clone())),
            },
        };

        match next {
            Some(status) => {
                debug!(partition_key, ?status, "hybrid partition improved");
                shard.insert(partition_key.to_string(), status);
                true
            }
            None => false,
        }
    }

    /// Forget one partition
    pub fn remove(&self, partition_key: &str) -> bool {
        self.enabled && self.shard(partition_key).write().remove(partition_key).is_some()
    }

    /// Forget every partition
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }

    /// Number of tracked partitions
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_disabled_manager_is_inert() {
        let manager = HybridStoreManager::new(false);
        assert!(!manager.add_partition_key("P1", None, true));
        assert!(!manager.has_partition("P1"));
        assert!(!manager.from_initial_for("P1"));
        assert!(manager.cursor_for("P1").is_none());
        assert!(!manager.improve_partition("P1", None));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_add_overwrites() {
        let manager = HybridStoreManager::new(true);
        assert!(manager.add_partition_key("P1", None, true));
        assert!(manager.from_initial_for("P1"));

        manager.add_partition_key("P1", Some("0002-b".into()), false);
        assert!(!manager.from_initial_for("P1"));
        assert_eq!(manager.cursor_for("P1"), Some(OrderingKey::from("0002-b")));
    }

    #[test]
    fn test_empty_cursor_means_none() {
        let manager = HybridStoreManager::new(true);
        manager.add_partition_key("P1", Some(OrderingKey::from("")), true);
        assert_eq!(manager.status_for("P1"), Some(HybridStatus::from_initial()));
    }

    #[test]
    fn test_improve_rules() {
        let manager = HybridStoreManager::new(true);

        assert!(manager.improve_partition("P1", Some(&"0002-b".into())));
        assert!(!manager.improve_partition("P1", Some(&"0001-a".into())));
        assert!(!manager.improve_partition("P1", Some(&"0002-b".into())));
        assert!(manager.improve_partition("P1", Some(&"0003-c".into())));
        assert_eq!(manager.cursor_for("P1"), Some(OrderingKey::from("0003-c")));

        assert!(manager.improve_partition("P1", None));
        assert!(manager.from_initial_for("P1"));
        assert!(!manager.improve_partition("P1", Some(&"0009-z".into())));
        assert!(!manager.improve_partition("P1", None));
        assert!(manager.from_initial_for("P1"));
    }

    #[test]
    fn test_concurrent_upserts_on_distinct_partitions() {
        let manager = Arc::new(HybridStoreManager::new(true));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        manager.add_partition_key(&format!("P{}-{}", t, i), None, true);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(manager.len(), 800);

        manager.clear();
        assert!(manager.is_empty());
    }
}

//! Sharded lock table.
//!
//! Serializes work per key without one lock per key: keys hash onto a fixed
//! number of shards, so memory stays bounded and unrelated keys rarely
//! contend. Two keys sharing a shard are serialized together, which is
//! harmless.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

#[derive(Debug)]
pub struct LockTable<L> {
    shards: Box<[L]>,
}

impl<L: Default> LockTable<L> {
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| L::default()).collect(),
        }
    }
}

impl<L> LockTable<L> {
    pub fn shard_index<K: Hash + ?Sized>(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// The lock guarding `key`.
    pub fn shard<K: Hash + ?Sized>(&self, key: &K) -> &L {
        &self.shards[self.shard_index(key)]
    }

    /// Every shard in index order. Callers that need the whole table take
    /// them in this order.
    pub fn iter(&self) -> impl Iterator<Item = &L> {
        self.shards.iter()
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_same_key_same_shard() {
        let table: LockTable<Mutex<()>> = LockTable::new(16);
        assert_eq!(table.shard_index("user:1"), table.shard_index("user:1"));
        assert!(std::ptr::eq(table.shard("user:1"), table.shard("user:1")));
    }

    #[test]
    fn test_zero_shards_rounds_up() {
        let table: LockTable<Mutex<()>> = LockTable::new(0);
        assert_eq!(table.len(), 1);
        assert_eq!(table.shard_index("anything"), 0);
    }

    #[test]
    fn test_keys_spread_over_shards() {
        let table: LockTable<Mutex<()>> = LockTable::new(8);
        let used: std::collections::HashSet<usize> =
            (0..256).map(|i| table.shard_index(&format!("key-{i}"))).collect();
        assert!(used.len() > 1);
    }

    #[test]
    fn test_iter_visits_every_shard() {
        let table: LockTable<Mutex<()>> = LockTable::new(4);
        let guards: Vec<_> = table.iter().map(|shard| shard.lock()).collect();
        assert_eq!(guards.len(), 4);
        assert!(table.shard("k").try_lock().is_none());
    }
}

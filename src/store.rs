//! Distributed state backends.
//!
//! A [`DistributedStateStore`] holds serialized key state shared between
//! limiter instances. Values are opaque strings with a time-to-live; the
//! limiter owns the encoding.

use crate::error::ThrottlerResult;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

/// Trait for distributed state backends.
#[async_trait]
pub trait DistributedStateStore: Send + Sync {
    async fn get(&self, key: &str) -> ThrottlerResult<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> ThrottlerResult<()>;

    async fn delete(&self, key: &str) -> ThrottlerResult<()>;

    /// Removes every key under `prefix`.
    async fn clear(&self, prefix: &str) -> ThrottlerResult<usize>;

    async fn is_healthy(&self) -> bool {
        true
    }
}

/// Map size at which the first prune of expired values runs.
pub const DEFAULT_PRUNE_THRESHOLD: usize = 1_024;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    /// `None` when the TTL is too large to represent.
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process store with per-key expiry. Shares state between limiters in
/// the same process.
///
/// Expired values are hidden on read and dropped in bulk whenever the map
/// reaches the prune threshold, which then doubles relative to the live
/// count, so writes stay amortized O(1).
#[derive(Debug)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, StoredValue>>,
    min_prune_at: usize,
    prune_at: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_prune_threshold(DEFAULT_PRUNE_THRESHOLD)
    }

    pub fn with_prune_threshold(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            values: RwLock::new(HashMap::new()),
            min_prune_at: threshold,
            prune_at: AtomicUsize::new(threshold),
        }
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune(&self, values: &mut HashMap<String, StoredValue>) {
        let now = Instant::now();
        let before = values.len();
        values.retain(|_, stored| stored.is_live(now));

        let next = values.len().saturating_mul(2).max(self.min_prune_at);
        self.prune_at.store(next, Ordering::Relaxed);
        trace!(removed = before - values.len(), next, "Pruned expired store values");
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DistributedStateStore for MemoryStore {
    async fn get(&self, key: &str) -> ThrottlerResult<Option<String>> {
        let values = self.values.read();
        let now = Instant::now();
        Ok(values
            .get(key)
            .filter(|stored| stored.is_live(now))
            .map(|stored| stored.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> ThrottlerResult<()> {
        let expires_at = Instant::now().checked_add(ttl);
        let mut values = self.values.write();
        values.insert(key.to_string(), StoredValue { value, expires_at });

        if values.len() >= self.prune_at.load(Ordering::Relaxed) {
            self.prune(&mut values);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> ThrottlerResult<()> {
        self.values.write().remove(key);
        Ok(())
    }

    async fn clear(&self, prefix: &str) -> ThrottlerResult<usize> {
        let mut values = self.values.write();
        let before = values.len();
        values.retain(|key, _| !key.starts_with(prefix));
        Ok(before - values.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::block_on;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        block_on(store.set("a", "1".to_string(), Duration::from_secs(60))).unwrap();
        assert_eq!(block_on(store.get("a")).unwrap().as_deref(), Some("1"));

        block_on(store.delete("a")).unwrap();
        assert_eq!(block_on(store.get("a")).unwrap(), None);
    }

    #[test]
    fn test_memory_store_expiry() {
        let store = MemoryStore::new();
        block_on(store.set("a", "1".to_string(), Duration::from_millis(1))).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(block_on(store.get("a")).unwrap(), None);
    }

    #[test]
    fn test_expired_values_are_pruned_on_write() {
        let store = MemoryStore::with_prune_threshold(4);
        for key in ["a", "b", "c"] {
            block_on(store.set(key, "1".to_string(), Duration::from_millis(1))).unwrap();
        }
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.len(), 3);

        block_on(store.set("d", "1".to_string(), Duration::from_secs(60))).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(block_on(store.get("d")).unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_live_values_survive_pruning() {
        let store = MemoryStore::with_prune_threshold(2);
        for i in 0..50 {
            block_on(store.set(&format!("k{i}"), "1".to_string(), Duration::from_secs(60))).unwrap();
        }
        assert_eq!(store.len(), 50);
    }

    #[test]
    fn test_unrepresentable_ttl_never_expires() {
        let store = MemoryStore::new();
        block_on(store.set("a", "1".to_string(), Duration::from_millis(u64::MAX))).unwrap();
        assert_eq!(block_on(store.get("a")).unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_memory_store_clear_by_prefix() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        block_on(store.set("ratewarden:a", "1".to_string(), ttl)).unwrap();
        block_on(store.set("ratewarden:b", "2".to_string(), ttl)).unwrap();
        block_on(store.set("other:c", "3".to_string(), ttl)).unwrap();

        assert_eq!(block_on(store.clear("ratewarden:")).unwrap(), 2);
        assert_eq!(store.len(), 1);
        assert!(block_on(store.is_healthy()));
    }
}

//! Bounded key/value store with least-recently-used eviction.
//!
//! Entries live in a slab of nodes threaded onto a doubly linked list
//! (head is the most recently used entry, tail the least). A hash map points
//! each key at its slab slot, which keeps `get` and `set` O(1). The whole
//! structure sits behind one lock; nothing outside this module ever touches
//! a node directly.

use crate::error::{ThrottlerError, ThrottlerResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, trace};

struct CacheEntry<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

struct LruList<K, V> {
    map: HashMap<K, usize>,
    slots: Vec<Option<CacheEntry<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K, V> LruList<K, V>
where
    K: Hash + Eq + Clone,
{
    fn with_capacity(capacity: usize) -> Self {
        // Avoid reserving huge slabs up front for generous limits.
        let reserve = capacity.min(1024);
        Self {
            map: HashMap::with_capacity(reserve),
            slots: Vec::with_capacity(reserve),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    fn entry(&self, idx: usize) -> Option<&CacheEntry<K, V>> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    fn entry_mut(&mut self, idx: usize) -> Option<&mut CacheEntry<K, V>> {
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.entry(idx) {
            Some(entry) => (entry.prev, entry.next),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(entry) = self.entry_mut(p) {
                    entry.next = next;
                }
            }
            None => self.head = next,
        }

        match next {
            Some(n) => {
                if let Some(entry) = self.entry_mut(n) {
                    entry.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(entry) = self.entry_mut(idx) {
            entry.prev = None;
            entry.next = None;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(entry) = self.entry_mut(idx) {
            entry.prev = None;
            entry.next = old_head;
        }
        match old_head {
            Some(h) => {
                if let Some(entry) = self.entry_mut(h) {
                    entry.prev = Some(idx);
                }
            }
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn promote(&mut self, idx: usize) {
        if self.head != Some(idx) {
            self.unlink(idx);
            self.push_front(idx);
        }
    }

    fn insert(&mut self, key: K, value: V) {
        let node = CacheEntry {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.map.insert(key, idx);
        self.push_front(idx);
    }

    fn remove_at(&mut self, idx: usize) -> Option<CacheEntry<K, V>> {
        self.unlink(idx);
        let entry = self.slots.get_mut(idx)?.take()?;
        self.map.remove(&entry.key);
        self.free.push(idx);
        Some(entry)
    }

    fn pop_back(&mut self) -> Option<CacheEntry<K, V>> {
        let idx = self.tail?;
        if self.entry(idx).is_none() {
            error!(slot = idx, entries = self.map.len(), "LRU tail points at an empty slot, rebuilding list");
            self.rebuild();
            let idx = self.tail?;
            return self.remove_at(idx);
        }
        self.remove_at(idx)
    }

    /// Relinks every mapped slot. Recency order is lost, membership is not.
    fn rebuild(&mut self) {
        self.head = None;
        self.tail = None;
        self.free.clear();

        for idx in 0..self.slots.len() {
            let live = match self.entry(idx) {
                Some(entry) => self.map.get(&entry.key) == Some(&idx),
                None => false,
            };
            if live {
                self.push_front(idx);
            } else {
                self.slots[idx] = None;
                self.free.push(idx);
            }
        }

        let slots = &self.slots;
        self.map
            .retain(|_, idx| slots.get(*idx).map_or(false, Option::is_some));
    }

    fn clear(&mut self) {
        self.map.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }
}

/// Point-in-time counters for a [`BoundedStateCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub capacity: usize,
}

/// Fixed-capacity map with LRU eviction and predicate-based bulk removal.
pub struct BoundedStateCache<K, V> {
    inner: Mutex<LruList<K, V>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> BoundedStateCache<K, V>
where
    K: Hash + Eq + Clone,
{
    pub fn new(capacity: usize) -> ThrottlerResult<Self> {
        if capacity == 0 {
            return Err(ThrottlerError::Configuration(
                "max_cache_size must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            inner: Mutex::new(LruList::with_capacity(capacity)),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    /// Returns a copy of the value and marks the key as most recently used.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let mut inner = self.inner.lock();
        match inner.map.get(key).copied() {
            Some(idx) => {
                inner.promote(idx);
                self.hits.fetch_add(1, Ordering::Relaxed);
                inner.entry(idx).map(|entry| entry.value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts or overwrites `key`. When a new key arrives at capacity the
    /// least recently used key is evicted first and returned.
    pub fn set(&self, key: K, value: V) -> Option<K> {
        let mut inner = self.inner.lock();

        if let Some(idx) = inner.map.get(&key).copied() {
            if let Some(entry) = inner.entry_mut(idx) {
                entry.value = value;
            }
            inner.promote(idx);
            return None;
        }

        let mut evicted = None;
        if inner.map.len() >= self.capacity {
            if let Some(entry) = inner.pop_back() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                evicted = Some(entry.key);
            }
        }

        inner.insert(key, value);
        evicted
    }

    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.inner.lock();
        match inner.map.get(key).copied() {
            Some(idx) => inner.remove_at(idx).is_some(),
            None => false,
        }
    }

    /// Membership test. Does not change recency.
    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().map.contains_key(key)
    }

    /// Removes every entry matching `predicate` in a single pass and returns
    /// how many were dropped. Holds the lock for the whole pass.
    pub fn cleanup<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut inner = self.inner.lock();
        let mut removed = 0;
        for idx in 0..inner.slots.len() {
            let matches = match inner.entry(idx) {
                Some(entry) => predicate(&entry.key, &entry.value),
                None => false,
            };
            if matches && inner.remove_at(idx).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Same as [`cleanup`](Self::cleanup) but visits at most `batch_size`
    /// slots per lock acquisition, so concurrent callers can interleave.
    pub fn cleanup_batched<F>(&self, mut predicate: F, batch_size: usize) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        let batch_size = batch_size.max(1);
        let mut removed = 0;
        let mut start: usize = 0;

        loop {
            let mut inner = self.inner.lock();
            let end = start.saturating_add(batch_size).min(inner.slots.len());
            if start >= end {
                break;
            }

            for idx in start..end {
                let matches = match inner.entry(idx) {
                    Some(entry) => predicate(&entry.key, &entry.value),
                    None => false,
                };
                if matches && inner.remove_at(idx).is_some() {
                    removed += 1;
                }
            }

            drop(inner);
            trace!(start, end, removed, "Swept cache batch");
            start = end;
        }

        removed
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<K> {
        let inner = self.inner.lock();
        let mut keys = Vec::with_capacity(inner.map.len());
        let mut cursor = inner.head;
        while let Some(idx) = cursor {
            match inner.entry(idx) {
                Some(entry) => {
                    keys.push(entry.key.clone());
                    cursor = entry.next;
                }
                None => break,
            }
        }
        keys
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.len(),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn cache(capacity: usize) -> BoundedStateCache<String, u32> {
        BoundedStateCache::new(capacity).unwrap()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = BoundedStateCache::<String, u32>::new(0);
        assert!(matches!(result, Err(ThrottlerError::Configuration(_))));
    }

    #[test]
    fn test_get_set_overwrite() {
        let cache = cache(2);
        assert_eq!(cache.get("a"), None);
        cache.set("a".to_string(), 1);
        cache.set("a".to_string(), 2);
        assert_eq!(cache.get("a"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = cache(3);
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        cache.set("c".to_string(), 3);

        let evicted = cache.set("d".to_string(), 4);
        assert_eq!(evicted.as_deref(), Some("a"));
        assert!(!cache.has("a"));
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_get_protects_from_eviction() {
        let cache = cache(3);
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        cache.set("c".to_string(), 3);

        assert_eq!(cache.get("a"), Some(1));
        let evicted = cache.set("d".to_string(), 4);

        assert_eq!(evicted.as_deref(), Some("b"));
        assert!(cache.has("a"));
        assert_eq!(cache.keys(), vec!["d", "a", "c"]);
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let cache = cache(2);
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        assert_eq!(cache.set("a".to_string(), 10), None);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.keys(), vec!["a", "b"]);
    }

    #[test]
    fn test_has_does_not_promote() {
        let cache = cache(2);
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        assert!(cache.has("a"));
        assert_eq!(cache.set("c".to_string(), 3).as_deref(), Some("a"));
    }

    #[test]
    fn test_delete_reuses_slot() {
        let cache = cache(2);
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));

        cache.set("c".to_string(), 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.keys(), vec!["c", "b"]);
    }

    #[test]
    fn test_cleanup_removes_matching() {
        let cache = cache(10);
        for i in 0..10u32 {
            cache.set(format!("k{i}"), i);
        }

        let removed = cache.cleanup(|_, v| v % 2 == 0);
        assert_eq!(removed, 5);
        assert_eq!(cache.len(), 5);
        assert!(cache.keys().iter().all(|k| k != "k0" && k != "k4"));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_cleanup_batched_matches_full_pass() {
        let cache = cache(100);
        for i in 0..100u32 {
            cache.set(format!("k{i}"), i);
        }

        let removed = cache.cleanup_batched(|_, v| *v < 70, 8);
        assert_eq!(removed, 70);
        assert_eq!(cache.len(), 30);
        assert_eq!(cache.keys().len(), 30);
    }

    #[test]
    fn test_clear() {
        let cache = cache(4);
        cache.set("a".to_string(), 1);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.keys().is_empty());
    }

    #[test]
    fn test_hit_and_miss_counters() {
        let cache = cache(4);
        cache.set("a".to_string(), 1);
        cache.get("a");
        cache.get("b");
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.capacity, 4);
    }

    #[test]
    fn test_concurrent_access_keeps_list_consistent() {
        let cache = Arc::new(cache(64));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..500u32 {
                        let key = format!("k{}", (t * 31 + i) % 200);
                        cache.set(key.clone(), i);
                        cache.get(&key);
                        if i % 7 == 0 {
                            cache.delete(&key);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.len() <= 64);
        assert_eq!(cache.keys().len(), cache.len());
    }
}

//! Insertion-ordered frame caches.
//!
//! Keys are pure functions of their inputs, so a plain map with
//! oldest-first batch eviction is sufficient; no recency tracking.

use std::collections::{HashMap, VecDeque};

use tracing::trace;

/// A bounded cache evicting the oldest-inserted entries in batches.
pub struct FrameCache<V> {
    name: &'static str,
    capacity: usize,
    evict_batch: usize,
    map: HashMap<String, V>,
    order: VecDeque<String>,
}

impl<V: Clone> FrameCache<V> {
    /// Create a cache with the given capacity and eviction batch size.
    pub fn new(name: &'static str, capacity: usize, evict_batch: usize) -> Self {
        Self {
            name,
            capacity,
            evict_batch: evict_batch.max(1),
            map: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.map.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Insert a value; existing keys keep their insertion position.
    pub fn insert(&mut self, key: String, value: V) {
        if self.map.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }
        if self.map.len() > self.capacity {
            for _ in 0..self.evict_batch {
                if let Some(oldest) = self.order.pop_front() {
                    self.map.remove(&oldest);
                }
            }
            trace!(cache = self.name, len = self.map.len(), "Evicted batch");
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
        trace!(cache = self.name, "Cleared");
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_held_after_eviction() {
        let mut cache = FrameCache::new("test", 25, 5);
        for i in 0..100 {
            cache.insert(format!("k{i}"), i);
        }
        assert!(cache.len() <= 25);
        assert!(cache.get("k99").is_some());
        assert!(cache.get("k0").is_none());
    }

    #[test]
    fn test_reinsert_does_not_duplicate_order() {
        let mut cache = FrameCache::new("test", 3, 1);
        cache.insert("a".to_string(), 1);
        cache.insert("a".to_string(), 2);
        cache.insert("b".to_string(), 3);
        cache.insert("c".to_string(), 4);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("a"), Some(2));
        // One more evicts the oldest ("a").
        cache.insert("d".to_string(), 5);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("d"), Some(5));
    }

    #[test]
    fn test_clear() {
        let mut cache = FrameCache::new("test", 4, 2);
        cache.insert("a".to_string(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}

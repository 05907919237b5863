//! Bounded least-recently-used cache of encoded pages.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

use super::encoder::EncodedPage;

/// Default number of distinct images kept encoded.
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Computes the cache key for a pixel buffer.
pub fn content_hash(pixels: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    pixels.hash(&mut hasher);
    hasher.finish()
}

/// LRU cache of encoded pages keyed by content hash.
///
/// Entries are stored with the key index byte unset; callers patch a copy.
#[derive(Debug)]
pub struct PageCache {
    capacity: usize,
    entries: HashMap<u64, Arc<EncodedPage>>,
    /// Keys ordered from least to most recently used.
    recency: VecDeque<u64>,
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl PageCache {
    /// Creates a cache holding at most `capacity` entries. Zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            recency: VecDeque::with_capacity(capacity),
        }
    }

    /// Looks up an entry and marks it most recently used.
    pub fn get(&mut self, key: u64) -> Option<Arc<EncodedPage>> {
        let page = self.entries.get(&key)?.clone();
        self.touch(key);
        Some(page)
    }

    /// Inserts an entry, evicting the least recently used one when full.
    pub fn insert(&mut self, key: u64, page: Arc<EncodedPage>) {
        if self.capacity == 0 {
            return;
        }

        if self.entries.insert(key, page).is_some() {
            self.touch(key);
            return;
        }

        self.recency.push_back(key);
        while self.entries.len() > self.capacity {
            match self.recency.pop_front() {
                Some(evicted) => {
                    self.entries.remove(&evicted);
                    debug!("Evicted cached page {:016x}", evicted);
                }
                None => break,
            }
        }
    }

    /// Returns true if the key is cached, without changing recency.
    pub fn contains(&self, key: u64) -> bool {
        self.entries.contains_key(&key)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    fn touch(&mut self, key: u64) {
        if let Some(pos) = self.recency.iter().position(|&k| k == key) {
            self.recency.remove(pos);
        }
        self.recency.push_back(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Arc<EncodedPage> {
        Arc::new(EncodedPage::blank())
    }

    #[test]
    fn test_content_hash_is_deterministic() {
        let a = vec![1u8, 2, 3];
        let b = vec![1u8, 2, 3];
        let c = vec![1u8, 2, 4];
        assert_eq!(content_hash(&a), content_hash(&b));
        assert_ne!(content_hash(&a), content_hash(&c));
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = PageCache::new(2);
        cache.insert(1, page());
        cache.insert(2, page());

        // Touch 1 so 2 becomes the eviction candidate
        assert!(cache.get(1).is_some());
        cache.insert(3, page());

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(1));
        assert!(!cache.contains(2));
        assert!(cache.contains(3));
    }

    #[test]
    fn test_reinsert_does_not_grow() {
        let mut cache = PageCache::new(2);
        cache.insert(1, page());
        cache.insert(1, page());
        assert_eq!(cache.len(), 1);
        cache.insert(2, page());
        cache.insert(3, page());
        assert!(!cache.contains(1));
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let mut cache = PageCache::new(0);
        cache.insert(1, page());
        assert!(cache.is_empty());
        assert!(cache.get(1).is_none());
    }
}

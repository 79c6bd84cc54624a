//! In-memory cache of fetched source documents and signed outputs
//!
//! Signed PDFs are cached under a fresh key so they can be fed back in as a
//! `cache_key` source.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

struct Entries {
    lru: LruCache<String, Vec<u8>>,
    bytes: usize,
}

impl Entries {
    fn pop(&mut self, key: &str) -> Option<Vec<u8>> {
        let data = self.lru.pop(key)?;
        self.bytes -= data.len();
        Some(data)
    }
}

/// LRU cache of PDF bytes bounded by entry count and total bytes
pub struct CacheManager {
    entries: Mutex<Entries>,
    max_bytes: usize,
}

impl CacheManager {
    pub fn new(capacity: usize, max_bytes: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(Entries {
                lru: LruCache::new(capacity),
                bytes: 0,
            }),
            max_bytes,
        }
    }

    /// Insert bytes under `key`, evicting least recently used entries until
    /// the byte budget holds. Entries larger than the whole budget are
    /// dropped. Returns whether the entry was kept.
    pub fn put(&self, key: String, data: Vec<u8>) -> bool {
        if data.len() > self.max_bytes {
            tracing::debug!(size = data.len(), "Entry exceeds cache budget, not cached");
            return false;
        }

        let mut entries = self.entries.lock();
        entries.pop(&key);

        while entries.bytes + data.len() > self.max_bytes {
            match entries.lru.pop_lru() {
                Some((evicted, old)) => {
                    entries.bytes -= old.len();
                    tracing::debug!(key = %evicted, "Evicted cache entry");
                }
                None => break,
            }
        }

        entries.bytes += data.len();
        // Capacity eviction by the LRU itself
        if let Some((_, old)) = entries.lru.push(key, data) {
            entries.bytes -= old.len();
        }
        true
    }

    /// Store bytes under a fresh key and return the key, or `None` when the
    /// entry does not fit the byte budget
    pub fn insert(&self, data: Vec<u8>) -> Option<String> {
        let key = self.generate_unique_key();
        self.put(key.clone(), data).then_some(key)
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().lru.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().lru.contains(key)
    }

    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().pop(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().lru.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.entries.lock().bytes
    }

    /// A key not currently in use
    pub fn generate_unique_key(&self) -> String {
        let entries = self.entries.lock();
        loop {
            let key = uuid::Uuid::new_v4().to_string();
            if !entries.lru.contains(&key) {
                return key;
            }
        }
    }
}

//! Geolookup - Result cache
//!
//! A bounded LRU of previously resolved keys with an independent TTL.
//! Whichever bound triggers first wins: the LRU evicts on insertion at
//! capacity, expired entries are purged lazily when read.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

/// Default capacity used when the configured one is below 1.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Default time-to-live: ten hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60 * 60);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() > ttl
    }
}

/// Thread-safe LRU + TTL cache keyed by lookup key.
pub struct ResultCache<V> {
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    ttl: Duration,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Cached value for `key`, bumping its recency.
    ///
    /// Expired entries are removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock();
        let expired = entries.peek(key)?.is_expired(self.ttl);
        if expired {
            entries.pop(key);
            return None;
        }
        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Insert or overwrite `key` with a fresh timestamp.
    ///
    /// At capacity, a new key evicts the least recently used entry.
    pub fn put(&self, key: impl Into<String>, value: V) {
        self.entries.lock().put(
            key.into(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Overwrite a live entry in place.
    ///
    /// Recency is left untouched and nothing is evicted. Returns `false`
    /// when the key is no longer cached; an expired entry is dropped instead
    /// of being revived.
    pub fn refresh(&self, key: &str, value: V) -> bool {
        let mut entries = self.entries.lock();
        let expired = match entries.peek(key) {
            Some(entry) => entry.is_expired(self.ttl),
            None => return false,
        };
        if expired {
            entries.pop(key);
            return false;
        }
        if let Some(entry) = entries.peek_mut(key) {
            entry.value = value;
            entry.inserted_at = Instant::now();
        }
        true
    }

    /// Point-in-time copy of the live keys, most recent first.
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, entry)| !entry.is_expired(self.ttl))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(self.ttl))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    #[cfg(test)]
    fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains(key)
    }
}

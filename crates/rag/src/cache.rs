//! Bounded in-process caches
//!
//! One writer lock per cache, LRU eviction, optional TTL. Keys are
//! SHA-256 digests of normalized text so raw queries never sit in memory
//! longer than a request. Caches are strictly read-through: nothing in
//! here calls back into providers.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

/// Cache hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Entry<V> {
    value: V,
    inserted: Instant,
}

/// LRU cache with optional per-entry TTL
pub struct LruTtlCache<V: Clone> {
    inner: Mutex<LruCache<String, Entry<V>>>,
    ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> LruTtlCache<V> {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// SHA-256 hex key over normalized (trimmed, lowercased) text
    pub fn key_for(text: &str) -> String {
        let normalized = text.trim().to_lowercase();
        hex::encode(Sha256::digest(normalized.as_bytes()))
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut cache = self.inner.lock();
        match cache.get(key) {
            Some(entry) => {
                if let Some(ttl) = self.ttl {
                    if entry.inserted.elapsed() > ttl {
                        cache.pop(key);
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                        self.misses.fetch_add(1, Ordering::Relaxed);
                        return None;
                    }
                }
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            },
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            },
        }
    }

    pub fn insert(&self, key: String, value: V) {
        let mut cache = self.inner.lock();
        if cache.len() == usize::from(cache.cap()) && !cache.contains(&key) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        cache.put(
            key,
            Entry {
                value,
                inserted: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_normalization() {
        let a = LruTtlCache::<String>::key_for("  Habeas Corpus ");
        let b = LruTtlCache::<String>::key_for("habeas corpus");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_hit_and_miss_counters() {
        let cache: LruTtlCache<u32> = LruTtlCache::new(4, None);
        let key = LruTtlCache::<u32>::key_for("q");
        assert_eq!(cache.get(&key), None);
        cache.insert(key.clone(), 7);
        assert_eq!(cache.get(&key), Some(7));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_lru_eviction() {
        let cache: LruTtlCache<u32> = LruTtlCache::new(2, None);
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);
        cache.insert("c".into(), 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("c"), Some(3));
        assert!(cache.stats().evictions >= 1);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache: LruTtlCache<u32> = LruTtlCache::new(4, Some(Duration::from_millis(0)));
        cache.insert("k".into(), 9);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        let cache: Arc<LruTtlCache<u64>> = Arc::new(LruTtlCache::new(128, None));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100u64 {
                        cache.insert(format!("{t}-{i}"), i);
                        cache.get(&format!("{t}-{i}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(cache.len() <= 128);
    }
}

//! LRU query cache for embedding results.
//!
//! Avoids re-embedding repeated queries. Entries expire after a TTL.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

struct CacheEntry {
    embedding: Arc<Vec<f32>>,
    inserted_at: Instant,
}

/// Thread-safe, bounded query → embedding cache.
///
/// Concurrent misses for the same query may both compute and insert; the
/// later insert wins, which is harmless because both values are equivalent.
pub struct QueryCache {
    inner: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl QueryCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(max_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(cap)),
            ttl,
        }
    }

    /// Returns None on miss or expired entry.
    pub fn get(&self, query: &str) -> Option<Arc<Vec<f32>>> {
        let mut inner = self.inner.lock();
        let expired = match inner.get(query) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                return Some(entry.embedding.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.pop(query);
        }
        None
    }

    pub fn put(&self, query: String, embedding: Arc<Vec<f32>>) {
        self.inner.lock().put(
            query,
            CacheEntry {
                embedding,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl Default for QueryCache {
    /// 1000 entries, one-hour TTL.
    fn default() -> Self {
        Self::new(1000, Duration::from_secs(3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hit_and_miss() {
        let cache = QueryCache::new(10, Duration::from_secs(3600));
        assert!(cache.get("học phí").is_none());

        cache.put("học phí".into(), Arc::new(vec![1.0, 2.0]));
        assert_eq!(cache.get("học phí").unwrap().as_slice(), &[1.0, 2.0]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let cache = QueryCache::new(2, Duration::from_secs(3600));
        cache.put("a".into(), Arc::new(vec![1.0]));
        cache.put("b".into(), Arc::new(vec![2.0]));
        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get("a").is_some());
        cache.put("c".into(), Arc::new(vec![3.0]));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = QueryCache::new(10, Duration::from_millis(1));
        cache.put("ephemeral".into(), Arc::new(vec![1.0]));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("ephemeral").is_none());
        assert!(cache.is_empty());
    }
}

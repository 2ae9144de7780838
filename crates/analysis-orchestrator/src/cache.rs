use dashmap::DashMap;
use serde::Serialize;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Internal cache entry with creation time
struct CacheEntry<V> {
    payload: V,
    created_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) < self.ttl
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Concurrent TTL cache with a soft capacity.
///
/// Expired entries are dropped lazily on read (or by `purge_expired`). When an
/// insert pushes the entry count past capacity, the oldest
/// `ceil(len * eviction_fraction)` entries by creation time are evicted.
pub struct TtlCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    default_ttl: Duration,
    capacity: usize,
    eviction_fraction: f64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(default_ttl: Duration, capacity: usize, eviction_fraction: f64) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            capacity: capacity.max(1),
            eviction_fraction: eviction_fraction.clamp(f64::EPSILON, 1.0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        // read guard must be released before removing
        let lookup = self
            .entries
            .get(key)
            .map(|entry| entry.is_fresh(now).then(|| entry.payload.clone()));

        match lookup {
            Some(Some(payload)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(payload)
            }
            Some(None) => {
                self.entries.remove_if(key, |_, entry| !entry.is_fresh(now));
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: K, payload: V) {
        self.insert_with_ttl(key, payload, self.default_ttl);
    }

    pub fn insert_with_ttl(&self, key: K, payload: V, ttl: Duration) {
        self.entries.insert(
            key,
            CacheEntry {
                payload,
                created_at: Instant::now(),
                ttl,
            },
        );

        if self.entries.len() > self.capacity {
            self.evict_oldest();
        }
    }

    fn evict_oldest(&self) {
        let len = self.entries.len();
        let count = ((len as f64 * self.eviction_fraction).ceil() as usize).clamp(1, len);

        let mut by_age: Vec<(K, Instant)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().created_at))
            .collect();
        by_age.sort_by_key(|(_, created_at)| *created_at);

        for (key, _) in by_age.into_iter().take(count) {
            self.entries.remove(&key);
        }
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
        tracing::debug!("Cache over capacity ({} > {}), evicted {} oldest entries", len, self.capacity, count);
    }

    /// Returns true if an entry was removed
    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry whose key matches `predicate`. Returns the number removed.
    pub fn invalidate_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&K) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|key, _| !predicate(key));
        before.saturating_sub(self.entries.len())
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

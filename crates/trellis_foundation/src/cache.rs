//! Bounded LRU cache with optional time-to-live.
//!
//! Used by the condition normalizer (memoized canonical forms) and the
//! sharing registry (canonical key to node lookups). Statistics live in a
//! shared block of atomics so they can be read while another thread holds
//! the cache itself.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// =============================================================================
// Configuration
// =============================================================================

/// Capacity and expiry settings for a [`BoundedCache`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CacheConfig {
    /// Maximum number of entries. Zero disables caching.
    pub capacity: usize,
    /// Entries older than this are treated as absent.
    pub ttl: Option<Duration>,
}

impl CacheConfig {
    /// Creates a config with the given capacity and no TTL.
    #[must_use]
    pub const fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ttl: None,
        }
    }

    /// Builder method to set the TTL.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::with_capacity(1024)
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Lock-free counters shared between a cache and its observers.
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    size: AtomicUsize,
    capacity: AtomicUsize,
}

impl CacheCounters {
    /// Takes a consistent-enough snapshot of the counters.
    #[must_use]
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            size: self.size.load(Ordering::Relaxed),
            capacity: self.capacity.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time cache statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CacheStats {
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub misses: u64,
    /// Entries dropped to make room for new ones.
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
    /// Current number of entries.
    pub size: usize,
    /// Configured capacity.
    pub capacity: usize,
}

impl CacheStats {
    /// Fraction of lookups that hit, or 0.0 before any lookup.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// =============================================================================
// Cache
// =============================================================================

#[derive(Clone, Debug)]
struct Slot<V> {
    value: V,
    inserted_at: Instant,
    /// Recency stamp; key into `order`.
    stamp: u64,
}

/// A bounded least-recently-used cache.
///
/// `get` refreshes recency; inserting into a full cache evicts the least
/// recently used entry. With a TTL configured, an entry found past its
/// expiry is removed and reported as a miss.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    entries: HashMap<K, Slot<V>>,
    /// Recency stamp to key, oldest first.
    order: BTreeMap<u64, K>,
    next_stamp: u64,
    config: CacheConfig,
    counters: Arc<CacheCounters>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates an empty cache.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let counters = Arc::new(CacheCounters::default());
        counters.capacity.store(config.capacity, Ordering::Relaxed);
        Self {
            entries: HashMap::with_capacity(config.capacity.min(1024)),
            order: BTreeMap::new(),
            next_stamp: 0,
            config,
            counters,
        }
    }

    /// Returns the shared counters for lock-free observation.
    #[must_use]
    pub fn counters(&self) -> Arc<CacheCounters> {
        Arc::clone(&self.counters)
    }

    /// Returns a statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// Returns the number of stored entries (expired ones included until touched).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up a key, refreshing its recency on a hit.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let Some(slot) = self.entries.get(key) else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if self.is_expired(slot.inserted_at) {
            self.remove(key);
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let stamp = self.bump();
        let slot = self.entries.get_mut(key)?;
        self.order.remove(&slot.stamp);
        slot.stamp = stamp;
        self.order.insert(stamp, key.clone());
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(slot.value.clone())
    }

    /// Looks up a key without touching recency or statistics.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries
            .get(key)
            .filter(|slot| !self.is_expired(slot.inserted_at))
            .map(|slot| &slot.value)
    }

    /// Inserts or replaces an entry, evicting the least recently used
    /// entry when the cache is full.
    pub fn insert(&mut self, key: K, value: V) {
        if self.config.capacity == 0 {
            return;
        }

        let stamp = self.bump();
        if let Some(slot) = self.entries.get_mut(&key) {
            self.order.remove(&slot.stamp);
            slot.value = value;
            slot.inserted_at = Instant::now();
            slot.stamp = stamp;
            self.order.insert(stamp, key);
            return;
        }

        while self.entries.len() >= self.config.capacity {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }

        self.order.insert(stamp, key.clone());
        self.entries.insert(
            key,
            Slot {
                value,
                inserted_at: Instant::now(),
                stamp,
            },
        );
        self.sync_size();
    }

    /// Removes an entry, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.stamp);
        self.sync_size();
        Some(slot.value)
    }

    /// Keeps only the entries for which `keep` returns true.
    ///
    /// Returns the number of entries removed. Removals here are
    /// invalidations, not evictions.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        let before = self.entries.len();
        let order = &mut self.order;
        self.entries.retain(|key, slot| {
            let kept = keep(key, &slot.value);
            if !kept {
                order.remove(&slot.stamp);
            }
            kept
        });
        self.sync_size();
        before - self.entries.len()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.sync_size();
    }

    fn bump(&mut self) -> u64 {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        stamp
    }

    fn is_expired(&self, inserted_at: Instant) -> bool {
        self.config
            .ttl
            .is_some_and(|ttl| inserted_at.elapsed() >= ttl)
    }

    fn sync_size(&self) {
        self.counters
            .size
            .store(self.entries.len(), Ordering::Relaxed);
    }
}

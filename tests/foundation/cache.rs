//! Integration tests for BoundedCache
//!
//! Tests LRU eviction, TTL expiry, statistics, and the capacity bound.

use std::time::Duration;

use proptest::prelude::*;
use trellis_foundation::{BoundedCache, CacheConfig};

#[test]
fn lru_evicts_least_recently_used() {
    let mut cache = BoundedCache::new(CacheConfig::with_capacity(2));
    cache.insert("a", 1);
    cache.insert("b", 2);
    assert_eq!(cache.get(&"a"), Some(1));
    cache.insert("c", 3);

    assert_eq!(cache.peek(&"b"), None);
    assert_eq!(cache.peek(&"a"), Some(&1));
    assert_eq!(cache.peek(&"c"), Some(&3));
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn replacing_does_not_evict() {
    let mut cache = BoundedCache::new(CacheConfig::with_capacity(1));
    cache.insert("a", 1);
    cache.insert("a", 2);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.stats().evictions, 0);
    assert_eq!(cache.get(&"a"), Some(2));
}

#[test]
fn expired_entry_is_a_miss() {
    let mut cache = BoundedCache::new(CacheConfig::with_capacity(4).with_ttl(Duration::ZERO));
    cache.insert(1, "one");
    std::thread::sleep(Duration::from_millis(2));

    assert_eq!(cache.get(&1), None);
    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.expirations, 1);
    assert_eq!(stats.size, 0);
}

#[test]
fn zero_capacity_stores_nothing() {
    let mut cache = BoundedCache::new(CacheConfig::with_capacity(0));
    cache.insert(1, 1);
    assert!(cache.is_empty());
}

#[test]
fn counters_are_shared() {
    let mut cache = BoundedCache::new(CacheConfig::with_capacity(4));
    let counters = cache.counters();
    cache.insert(1, 1);
    cache.get(&1);
    cache.get(&2);

    let stats = counters.snapshot();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.size, 1);
    assert_eq!(stats.capacity, 4);
    assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
}

#[test]
fn retain_is_not_eviction() {
    let mut cache = BoundedCache::new(CacheConfig::with_capacity(8));
    for i in 0..6 {
        cache.insert(i, i);
    }
    assert_eq!(cache.retain(|k, _| k % 2 == 0), 3);
    assert_eq!(cache.len(), 3);
    assert_eq!(cache.stats().evictions, 0);
}

proptest! {
    #[test]
    fn size_never_exceeds_capacity(capacity in 1usize..32, extra in 0usize..32) {
        let mut cache = BoundedCache::new(CacheConfig::with_capacity(capacity));
        for key in 0..capacity + extra {
            cache.insert(key, key);
        }
        let stats = cache.stats();
        prop_assert_eq!(cache.len(), capacity);
        prop_assert_eq!(stats.size, capacity);
        prop_assert_eq!(stats.evictions, extra as u64);
    }
}

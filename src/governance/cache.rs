//! TTL response cache with hit-count eviction.
//!
//! # Eviction
//! ```text
//! size > high_water after a write:
//!     Phase 1 (expire): drop every entry with now > expires_at
//!     Phase 2 (prune):  still > low_water?
//!                       sort by (hit_count, expires_at) ascending
//!                       drop from the front until size == low_water
//! ```
//!
//! # Design Decisions
//! - Expiry is lazy: an expired entry is a miss and is removed when touched
//! - Least-frequently-used bias: a heavily hit stale entry outlives a fresh
//!   unused one
//! - Keys are kept ordered so namespace invalidation is a range scan
//! - One mutex over the store; expire-then-prune runs under it

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::clock::Clock;
use crate::observability::metrics;

/// Result of a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup<V> {
    Hit(V),
    Miss,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    payload: V,
    expires_at: u64,
    hit_count: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug)]
struct CacheState<V> {
    entries: BTreeMap<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
}

/// Counters for the admin and health endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
}

/// Entries removed by one eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct EvictionReport {
    expired: usize,
    pruned: usize,
}

/// Keyed store of previously produced responses.
#[derive(Debug)]
pub struct ResponseCache<V> {
    state: Mutex<CacheState<V>>,
    high_water: usize,
    low_water: usize,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(high_water: usize, low_water: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: BTreeMap::new(),
                hits: 0,
                misses: 0,
            }),
            high_water,
            low_water: low_water.min(high_water),
            clock,
        }
    }

    pub fn get(&self, key: &str) -> CacheLookup<V> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let lookup = match state.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.hit_count += 1;
                CacheLookup::Hit(entry.payload.clone())
            }
            Some(_) => {
                state.entries.remove(key);
                metrics::record_cache_size(state.entries.len());
                CacheLookup::Miss
            }
            None => CacheLookup::Miss,
        };

        let hit = matches!(lookup, CacheLookup::Hit(_));
        if hit {
            state.hits += 1;
        } else {
            state.misses += 1;
        }
        metrics::record_cache_lookup(hit);
        lookup
    }

    /// Store `payload` under `key` for `ttl_secs`, replacing any previous entry.
    pub fn set(&self, key: &str, payload: V, ttl_secs: u64) {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        state.entries.insert(
            key.to_string(),
            CacheEntry {
                payload,
                expires_at: now.saturating_add(ttl_secs.saturating_mul(1000)),
                hit_count: 0,
            },
        );

        if state.entries.len() > self.high_water {
            let report = self.evict_locked(&mut state, now);
            tracing::debug!(
                expired = report.expired,
                pruned = report.pruned,
                size = state.entries.len(),
                "Cache eviction pass"
            );
        }
        metrics::record_cache_size(state.entries.len());
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = state.entries.remove(key).is_some();
        metrics::record_cache_size(state.entries.len());
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let lookups = state.hits + state.misses;
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
            size: state.entries.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every key starting with `prefix`. Returns how many were removed.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let doomed: Vec<String> = state
            .entries
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        for key in &doomed {
            state.entries.remove(key);
        }

        metrics::record_cache_size(state.entries.len());
        doomed.len()
    }

    /// Phase 1 only: drop expired entries regardless of size.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = expire(&mut state.entries, now);
        if removed > 0 {
            metrics::record_cache_eviction("expire", removed);
        }
        metrics::record_cache_size(state.entries.len());
        removed
    }

    fn evict_locked(&self, state: &mut CacheState<V>, now: u64) -> EvictionReport {
        let expired = expire(&mut state.entries, now);

        let mut pruned = 0;
        if state.entries.len() > self.low_water {
            let excess = state.entries.len() - self.low_water;
            let mut ranked: Vec<(u64, u64, String)> = state
                .entries
                .iter()
                .map(|(key, entry)| (entry.hit_count, entry.expires_at, key.clone()))
                .collect();
            ranked.sort_unstable();

            for (_, _, key) in ranked.into_iter().take(excess) {
                state.entries.remove(&key);
                pruned += 1;
            }
        }

        if expired > 0 {
            metrics::record_cache_eviction("expire", expired);
        }
        if pruned > 0 {
            metrics::record_cache_eviction("prune", pruned);
        }
        EvictionReport { expired, pruned }
    }
}

fn expire<V>(entries: &mut BTreeMap<String, CacheEntry<V>>, now: u64) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    before - entries.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache(high: usize, low: usize) -> (Arc<ManualClock>, ResponseCache<String>) {
        let clock = Arc::new(ManualClock::new(0));
        (clock.clone(), ResponseCache::new(high, low, clock))
    }

    #[test]
    fn test_set_then_get_hits_until_ttl() {
        let (clock, cache) = cache(100, 80);
        cache.set("user:42", "alice".to_string(), 10);

        assert_eq!(cache.get("user:42"), CacheLookup::Hit("alice".to_string()));

        // Expiry is strict: at exactly the TTL the entry is still live.
        clock.advance_secs(10);
        assert_eq!(cache.get("user:42"), CacheLookup::Hit("alice".to_string()));

        clock.advance_ms(1);
        assert_eq!(cache.get("user:42"), CacheLookup::Miss);
        // Expired entry was removed on touch.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let (_clock, cache) = cache(100, 80);
        cache.set("a", "1".to_string(), 60);
        cache.get("a");
        cache.get("a");
        cache.get("a");
        cache.get("missing");

        let stats = cache.stats();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert!((stats.hit_rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_delete() {
        let (_clock, cache) = cache(100, 80);
        cache.set("a", "1".to_string(), 60);
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        assert_eq!(cache.get("a"), CacheLookup::Miss);
    }

    #[test]
    fn test_overwrite_resets_hit_count() {
        let (_clock, cache) = cache(2, 1);
        cache.set("a", "old".to_string(), 60);
        cache.get("a");
        cache.set("a", "new".to_string(), 60);
        cache.set("b", "b".to_string(), 60);
        cache.get("b");

        // Third key trips eviction down to one entry. "a" lost its hit on overwrite.
        cache.set("c", "c".to_string(), 120);
        assert_eq!(cache.get("a"), CacheLookup::Miss);
        assert_eq!(cache.get("b"), CacheLookup::Hit("b".to_string()));
    }

    #[test]
    fn test_expire_phase_runs_before_prune() {
        let (clock, cache) = cache(4, 2);
        cache.set("short-1", "x".to_string(), 1);
        cache.set("short-2", "x".to_string(), 1);
        cache.set("long-1", "x".to_string(), 600);
        cache.set("long-2", "x".to_string(), 600);

        clock.advance_secs(5);
        // Fifth entry: both short entries are expired and go first, leaving 3 > 2.
        cache.set("long-3", "x".to_string(), 600);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_prune_keeps_frequently_hit_entries() {
        let (_clock, cache) = cache(10, 5);
        for i in 0..10 {
            cache.set(&format!("k{i}"), i.to_string(), 600);
        }
        for i in [1, 3, 5, 7, 9] {
            cache.get(&format!("k{i}"));
        }

        // Eleventh entry crosses the high-water mark.
        cache.set("k10", "10".to_string(), 600);
        assert_eq!(cache.len(), 5);

        for i in [1, 3, 5, 7, 9] {
            assert!(matches!(cache.get(&format!("k{i}")), CacheLookup::Hit(_)), "k{i} should survive");
        }
        for i in [0, 2, 4, 6, 8, 10] {
            assert_eq!(cache.get(&format!("k{i}")), CacheLookup::Miss, "k{i} should be evicted");
        }
    }

    #[test]
    fn test_stale_but_popular_beats_fresh_but_unused() {
        let (clock, cache) = cache(2, 1);
        cache.set("popular", "p".to_string(), 600);
        for _ in 0..5 {
            cache.get("popular");
        }
        clock.advance_secs(500);
        cache.set("fresh", "f".to_string(), 600);
        cache.set("fresher", "f".to_string(), 600);

        assert_eq!(cache.len(), 1);
        assert!(matches!(cache.get("popular"), CacheLookup::Hit(_)));
    }

    #[test]
    fn test_remove_prefix_is_exact() {
        let (_clock, cache) = cache(100, 80);
        cache.set("properties:list:/properties?page=1", "a".to_string(), 60);
        cache.set("properties:list:/properties?page=2", "b".to_string(), 60);
        cache.set("properties:listing:/x", "c".to_string(), 60);
        cache.set("properties:lis", "d".to_string(), 60);
        cache.set("user:42", "e".to_string(), 60);

        assert_eq!(cache.remove_prefix("properties:list:"), 2);
        assert_eq!(cache.len(), 3);
        assert!(matches!(cache.get("properties:listing:/x"), CacheLookup::Hit(_)));
        assert!(matches!(cache.get("properties:lis"), CacheLookup::Hit(_)));
        assert!(matches!(cache.get("user:42"), CacheLookup::Hit(_)));

        assert_eq!(cache.remove_prefix("nothing:"), 0);
    }

    #[test]
    fn test_sweep_expired() {
        let (clock, cache) = cache(100, 80);
        cache.set("a", "1".to_string(), 1);
        cache.set("b", "2".to_string(), 100);
        clock.advance_secs(2);
        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_writes_stay_bounded() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = Arc::new(ResponseCache::new(50, 40, clock));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        cache.set(&format!("t{t}:{i}"), i, 60);
                        cache.get(&format!("t{t}:{}", i / 2));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.len() <= 50);
    }
}

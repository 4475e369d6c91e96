//! TTL read-through cache in front of the retry executor.
//!
//! `get` never returns an expired entry. Expired entries are dropped by
//! [`ResponseCache::purge_expired`] and by a sweep that runs inside `put` at
//! most once per TTL, so a cache fed with distinct keys stays bounded by what
//! one TTL's worth of writes can insert. Readers share the lock; writers hold
//! it for one map mutation plus the occasional sweep.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use crate::core::{Clock, MonotonicClock};

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// Valid iff `now - inserted_at < ttl`.
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) < self.ttl
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn inserted_at(&self) -> Instant {
        self.inserted_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

pub struct ResponseCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    next_sweep: Mutex<Instant>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V> fmt::Debug for ResponseCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.read().len())
            .finish()
    }
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(MonotonicClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            entries: RwLock::new(HashMap::new()),
            next_sweep: Mutex::new(now.checked_add(ttl).unwrap_or(now)),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        self.read()
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.value.clone())
    }

    /// Insert with the cache-wide TTL. A zero TTL stores nothing.
    pub fn put(&self, key: impl Into<String>, value: V) {
        self.put_with_ttl(key, value, self.ttl);
    }

    pub fn put_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let now = self.clock.now();
        let entry = CacheEntry {
            value,
            inserted_at: now,
            ttl,
        };
        let mut entries = self.write();
        if self.sweep_due(now) {
            let before = entries.len();
            entries.retain(|_, entry| entry.is_fresh(now));
            log::trace!("cache sweep dropped {} expired entries", before - entries.len());
        }
        entries.insert(key.into(), entry);
    }

    fn sweep_due(&self, now: Instant) -> bool {
        let mut next = self.next_sweep.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if now < *next {
            return false;
        }
        *next = now.checked_add(self.ttl.max(Duration::from_secs(1))).unwrap_or(now);
        true
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.write().remove(key).map(|entry| entry.value)
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Physical size, expired entries included.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl<V> ResponseCache<V> {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);
    const NANO: Duration = Duration::from_nanos(1);

    #[test]
    fn ttl_boundary_is_exclusive() {
        let clock = ManualClock::new();
        let cache = ResponseCache::with_clock(DAY, Arc::new(clock.clone()));
        cache.put("skip-times/21/1", "op 90s");

        clock.set_elapsed(DAY - NANO);
        assert_eq!(cache.get("skip-times/21/1"), Some("op 90s"));

        clock.set_elapsed(DAY);
        assert_eq!(cache.get("skip-times/21/1"), None);

        clock.set_elapsed(DAY + NANO);
        assert_eq!(cache.get("skip-times/21/1"), None);
        // Still physically present until purged.
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn put_replaces_stale_entry() {
        let clock = ManualClock::new();
        let cache = ResponseCache::with_clock(Duration::from_secs(60), Arc::new(clock.clone()));
        cache.put("k", 1);
        clock.advance(Duration::from_secs(61));
        assert_eq!(cache.get("k"), None);
        cache.put("k", 2);
        assert_eq!(cache.get("k"), Some(2));
    }

    #[test]
    fn writes_sweep_expired_entries_once_per_ttl() {
        let clock = ManualClock::new();
        let cache = ResponseCache::with_clock(Duration::from_secs(60), Arc::new(clock.clone()));
        for episode in 0..100 {
            cache.put(format!("skip-times/1/{episode}"), episode);
        }
        assert_eq!(cache.len(), 100);

        // Inside the first TTL nothing is swept.
        clock.advance(Duration::from_secs(30));
        cache.put("anime/1", 1);
        assert_eq!(cache.len(), 101);

        // The first write after the TTL drops everything stale.
        clock.advance(Duration::from_secs(31));
        cache.put("anime/2", 2);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("anime/1"), Some(1));

        // Distinct keys over many TTLs never pile up beyond one TTL of writes.
        for round in 0..50u64 {
            clock.advance(Duration::from_secs(61));
            cache.put(format!("search/{round}"), 0);
        }
        assert!(cache.len() <= 2, "{} entries kept", cache.len());
    }

    #[test]
    fn zero_ttl_disables_storage() {
        let cache = ResponseCache::new(Duration::ZERO);
        cache.put("k", 1);
        assert!(cache.is_empty());
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn concurrent_readers_and_writers() {
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for n in 0..100 {
                        cache.put(format!("{i}-{n}"), n);
                        assert_eq!(cache.get(&format!("{i}-{n}")), Some(n));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 800);
    }
}

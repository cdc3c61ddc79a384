//! In-memory memoization for template resolution.
//!
//! Resolving a name means parsing a key list and searching the workflow graph
//! once per key. The same template and the same graph are resolved again for
//! every image of a batch and usually for every batch of a run, so both
//! results are memoized here.
//!
//! # Design
//!
//! [`MemoCache`] is a small bounded map guarded by a single mutex:
//!
//! - **Capacity**: once `max_entries` is reached, inserting a new key evicts
//!   the least recently accessed entry.
//! - **Expiry**: entries older than `ttl` (measured from the last access) are
//!   dropped on read and count as a miss.
//! - **Stats**: hits, misses and evictions are tracked for diagnostics.
//!
//! ## Cache keys
//!
//! Parameter lookups are keyed by `"{fingerprint}:{key}"`, where the
//! fingerprint is the SHA-256 of the workflow graph (see
//! [`workflow::fingerprint`](crate::workflow::fingerprint)). Two runs of an
//! unchanged workflow therefore share entries; any edit to the graph changes
//! the fingerprint. Timestamp keys are never cached because their value
//! depends on the moment of the save.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default capacity of a [`MemoCache`].
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Default time-to-live of a [`MemoCache`] entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug)]
struct Entry<V> {
    value: V,
    last_access: Instant,
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    stats: CacheStats,
}

/// Bounded, expiring, thread-safe memo table.
#[derive(Debug)]
pub struct MemoCache<V> {
    max_entries: usize,
    ttl: Duration,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> MemoCache<V> {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            max_entries,
            ttl,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<V>> {
        // A panic while holding the lock cannot leave the map half-written,
        // so a poisoned cache is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the cached value for `key`, refreshing its access time.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let now = Instant::now();
        let expired = match inner.entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.last_access) <= self.ttl => {
                entry.last_access = now;
                let value = entry.value.clone();
                inner.stats.hits += 1;
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.entries.remove(key);
        }
        inner.stats.misses += 1;
        None
    }

    /// Store `value` under `key`, evicting the stalest entry when full.
    pub fn insert(&self, key: String, value: V) {
        if self.max_entries == 0 {
            return;
        }
        let mut guard = self.lock();
        let inner = &mut *guard;
        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_entries {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
                inner.stats.evictions += 1;
            }
        }
        inner.entries.insert(
            key,
            Entry {
                value,
                last_access: Instant::now(),
            },
        );
    }

    /// Return the cached value or compute, store and return it.
    pub fn get_or_insert_with(&self, key: &str, compute: impl FnOnce() -> V) -> V {
        if let Some(v) = self.get(key) {
            return v;
        }
        let value = compute();
        self.insert(key.to_string(), value.clone());
        value
    }

    pub fn remove(&self, key: &str) {
        self.lock().entries.remove(key);
    }

    /// Drop every entry. Stats are kept.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats.clone()
    }
}

impl<V: Clone> Default for MemoCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_TTL)
    }
}

/// Summary of cache performance.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn total(&self) -> u64 {
        self.hits + self.misses
    }

    /// Combine the stats of several caches.
    pub fn merged(&self, other: &CacheStats) -> CacheStats {
        CacheStats {
            hits: self.hits + other.hits,
            misses: self.misses + other.misses,
            evictions: self.evictions + other.evictions,
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 {
            write!(
                f,
                "{} cached, {} resolved ({} total)",
                self.hits,
                self.misses,
                self.total()
            )?;
        } else {
            write!(f, "{} resolved", self.misses)?;
        }
        if self.evictions > 0 {
            write!(f, ", {} evicted", self.evictions)?;
        }
        Ok(())
    }
}

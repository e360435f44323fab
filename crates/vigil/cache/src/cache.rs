//! TTL cache with least-recently-used eviction.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vigil_types::{ComponentHealth, HealthStatus};

use crate::config::CacheConfig;
use crate::snapshot::SnapshotStore;

/// A single cached value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    /// Lookup key.
    pub key: String,

    /// Cached payload.
    pub value: V,

    /// When the entry was written.
    pub created_at: DateTime<Utc>,

    /// Lifetime of the entry.
    #[serde(with = "vigil_types::duration_serde")]
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// Expiry instant, `None` if the TTL is too large to represent.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(self.ttl).ok()?;
        self.created_at.checked_add_signed(ttl)
    }

    /// A zero TTL is expired immediately.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
    pub max_size: usize,
    /// Hits as a percentage of all lookups, rounded to two decimals.
    pub hit_rate: f64,
    pub total_requests: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    hits: u64,
    misses: u64,
    sets: u64,
    deletes: u64,
    evictions: u64,
    expirations: u64,
}

struct Slot<V> {
    entry: CacheEntry<V>,
    touched: u64,
}

/// Everything guarded by the cache lock.
struct CacheInner<V> {
    entries: HashMap<String, Slot<V>>,
    /// touch tick -> key, oldest first.
    recency: BTreeMap<u64, String>,
    tick: u64,
    counters: Counters,
    /// Bumped on every persisted mutation.
    version: u64,
}

impl<V> CacheInner<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
            counters: Counters::default(),
            version: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch(&mut self, key: &str) {
        let tick = self.next_tick();
        if let Some(slot) = self.entries.get_mut(key) {
            self.recency.remove(&slot.touched);
            slot.touched = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.touched);
        Some(slot.entry)
    }

    fn insert(&mut self, entry: CacheEntry<V>) {
        let tick = self.next_tick();
        self.recency.insert(tick, entry.key.clone());
        self.entries.insert(
            entry.key.clone(),
            Slot {
                entry,
                touched: tick,
            },
        );
    }

    fn evict_lru(&mut self) -> Option<String> {
        let (_, key) = self.recency.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

/// Bounded key/value cache with per-entry TTL and LRU eviction.
///
/// Values are opaque to the cache. Cloning a value out of the cache is the
/// only way to read it, so callers never hold a reference across the lock.
pub struct Cache<V = serde_json::Value> {
    config: CacheConfig,
    inner: Mutex<CacheInner<V>>,
    snapshot: Option<Arc<dyn SnapshotStore<V>>>,
    /// Version of the last snapshot written.
    persisted: Mutex<u64>,
}

impl<V> Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an in-memory cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner::new()),
            snapshot: None,
            persisted: Mutex::new(0),
        }
    }

    /// Create a cache backed by a snapshot store and seed it from the last
    /// snapshot. Expired entries are dropped; a load failure is logged and
    /// the cache starts empty.
    pub fn with_snapshot(config: CacheConfig, store: Arc<dyn SnapshotStore<V>>) -> Self {
        let mut cache = Self::new(config);

        match store.load() {
            Ok(mut entries) => {
                let now = Utc::now();
                let total = entries.len();
                entries.retain(|entry| !entry.is_expired_at(now));
                entries.sort_by_key(|entry| entry.created_at);

                let mut inner = cache.inner.lock();
                for entry in entries {
                    inner.remove(&entry.key);
                    if inner.entries.len() >= cache.config.max_size {
                        inner.evict_lru();
                    }
                    inner.insert(entry);
                }
                info!(
                    loaded = inner.entries.len(),
                    dropped = total.saturating_sub(inner.entries.len()),
                    "Cache restored from snapshot"
                );
            }
            Err(e) => {
                warn!(error = %e, "Failed to load cache snapshot, starting empty");
            }
        }

        cache.snapshot = Some(store);
        cache
    }

    /// Look up a key. Expired entries are evicted and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Utc::now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            None => {
                inner.counters.misses += 1;
                return None;
            }
            Some(slot) => slot.entry.is_expired_at(now),
        };

        if expired {
            inner.remove(key);
            inner.counters.expirations += 1;
            inner.counters.misses += 1;
            debug!(key = key, "Cache entry expired on lookup");
            return None;
        }

        inner.touch(key);
        inner.counters.hits += 1;
        inner.entries.get(key).map(|slot| slot.entry.value.clone())
    }

    /// Insert or replace a value. `None` uses the configured default TTL.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let entry = CacheEntry {
            key: key.clone(),
            value,
            created_at: Utc::now(),
            ttl: ttl.unwrap_or(self.config.default_ttl),
        };

        let snapshot = {
            let mut inner = self.inner.lock();
            let replaced = inner.remove(&key).is_some();

            if !replaced && inner.entries.len() >= self.config.max_size {
                if let Some(evicted) = inner.evict_lru() {
                    inner.counters.evictions += 1;
                    debug!(key = %evicted, "Evicted least recently used cache entry");
                }
            }

            if self.config.max_size > 0 {
                inner.insert(entry);
            }
            inner.counters.sets += 1;
            self.capture(&mut inner)
        };

        self.persist(snapshot);
    }

    /// Remove a key. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        let (removed, snapshot) = {
            let mut inner = self.inner.lock();
            let removed = inner.remove(key).is_some();
            if removed {
                inner.counters.deletes += 1;
            }
            (removed, self.capture(&mut inner))
        };

        if removed {
            self.persist(snapshot);
        }
        removed
    }

    /// Drop every entry and reset the counters.
    pub fn clear(&self) {
        let snapshot = {
            let mut inner = self.inner.lock();
            let version = inner.version;
            *inner = CacheInner::new();
            inner.version = version;
            self.capture(&mut inner)
        };
        self.persist(snapshot);
        info!("Cache cleared");
    }

    /// Remove every expired entry, returning how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let (count, snapshot) = {
            let mut inner = self.inner.lock();
            let expired: Vec<String> = inner
                .entries
                .values()
                .filter(|slot| slot.entry.is_expired_at(now))
                .map(|slot| slot.entry.key.clone())
                .collect();

            for key in &expired {
                inner.remove(key);
            }
            inner.counters.expirations += expired.len() as u64;
            (expired.len(), self.capture(&mut inner))
        };

        if count > 0 {
            self.persist(snapshot);
            debug!(count = count, "Removed expired cache entries");
        }
        count
    }

    /// Whether a live entry exists. Does not refresh recency.
    pub fn exists(&self, key: &str) -> bool {
        let now = Utc::now();
        self.inner
            .lock()
            .entries
            .get(key)
            .map(|slot| !slot.entry.is_expired_at(now))
            .unwrap_or(false)
    }

    /// Keys of all live entries, least recently used first.
    pub fn keys(&self) -> Vec<String> {
        let now = Utc::now();
        let inner = self.inner.lock();
        inner
            .recency
            .values()
            .filter(|key| {
                inner
                    .entries
                    .get(*key)
                    .map(|slot| !slot.entry.is_expired_at(now))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let c = inner.counters;
        let total_requests = c.hits + c.misses;
        let hit_rate = if total_requests > 0 {
            ((c.hits as f64 / total_requests as f64) * 10_000.0).round() / 100.0
        } else {
            0.0
        };

        CacheStats {
            hits: c.hits,
            misses: c.misses,
            sets: c.sets,
            deletes: c.deletes,
            evictions: c.evictions,
            expirations: c.expirations,
            size: inner.entries.len(),
            max_size: self.config.max_size,
            hit_rate,
            total_requests,
        }
    }

    /// Warning when the hit rate is poor over a meaningful number of lookups.
    pub fn health(&self) -> ComponentHealth {
        let stats = self.stats();
        if stats.total_requests >= self.config.min_requests_for_health
            && stats.hit_rate < self.config.min_healthy_hit_rate
        {
            ComponentHealth::with_status(
                "cache",
                HealthStatus::Warning,
                format!("hit rate {:.2}% over {} requests", stats.hit_rate, stats.total_requests),
            )
        } else {
            ComponentHealth::healthy("cache")
        }
    }

    /// Collect live entries for the snapshot tier while the lock is held.
    fn capture(&self, inner: &mut CacheInner<V>) -> Option<(u64, Vec<CacheEntry<V>>)> {
        self.snapshot.as_ref()?;
        inner.version += 1;
        let now = Utc::now();
        let entries = inner
            .recency
            .values()
            .filter_map(|key| inner.entries.get(key))
            .filter(|slot| !slot.entry.is_expired_at(now))
            .map(|slot| slot.entry.clone())
            .collect();
        Some((inner.version, entries))
    }

    /// Write a captured snapshot unless a newer one already landed.
    fn persist(&self, snapshot: Option<(u64, Vec<CacheEntry<V>>)>) {
        let (Some(store), Some((version, entries))) = (self.snapshot.as_ref(), snapshot) else {
            return;
        };

        let mut persisted = self.persisted.lock();
        if version <= *persisted {
            return;
        }
        match store.save(&entries) {
            Ok(()) => *persisted = version,
            Err(e) => warn!(error = %e, entries = entries.len(), "Failed to persist cache snapshot"),
        }
    }
}

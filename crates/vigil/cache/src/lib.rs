//! # Vigil Cache - Bounded TTL cache with LRU eviction
//!
//! A key/value store for results pulled from external data providers.
//!
//! - every entry carries its own time-to-live and is never returned once
//!   expired (an expired entry found on lookup is evicted on the spot)
//! - the number of entries never exceeds `max_size`; inserting a new key
//!   into a full cache evicts the least-recently-used entry first
//! - an optional [`SnapshotStore`] receives a best-effort snapshot of the
//!   live entries after every mutation and seeds the cache on startup
//!
//! All operations run inside a single critical section per cache, so
//! recency order, size bound and counters are always updated together.
//!
//! ```rust
//! use std::time::Duration;
//! use vigil_cache::{Cache, CacheConfig};
//!
//! let cache: Cache<String> = Cache::new(CacheConfig::default());
//! cache.set("weather:lisbon", "sunny".to_string(), Some(Duration::from_secs(60)));
//! assert_eq!(cache.get("weather:lisbon").as_deref(), Some("sunny"));
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod snapshot;

pub use cache::{Cache, CacheEntry, CacheStats};
pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use snapshot::{InMemorySnapshot, JsonFileSnapshot, SnapshotStore};

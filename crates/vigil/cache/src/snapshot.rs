//! Durable snapshot tier for the cache.
//!
//! A snapshot is the full list of live entries at the time of a mutation.
//! Entries keep their absolute creation time and TTL so a reload can drop
//! whatever expired while the process was down.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::CacheEntry;
use crate::error::CacheResult;

/// Storage backend for cache snapshots.
pub trait SnapshotStore<V>: Send + Sync {
    /// Replace the stored snapshot with `entries`.
    fn save(&self, entries: &[CacheEntry<V>]) -> CacheResult<()>;

    /// Load the stored snapshot.
    ///
    /// Returns an empty list if nothing was persisted yet.
    fn load(&self) -> CacheResult<Vec<CacheEntry<V>>>;
}

/// Snapshot stored as a single JSON file.
///
/// Writes go to `<path>.tmp` first and are renamed into place, so a crash
/// mid-write leaves the previous snapshot intact.
pub struct JsonFileSnapshot {
    path: PathBuf,
}

impl JsonFileSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<V> SnapshotStore<V> for JsonFileSnapshot
where
    V: Serialize + DeserializeOwned,
{
    fn save(&self, entries: &[CacheEntry<V>]) -> CacheResult<()> {
        let json = serde_json::to_vec(entries)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn load(&self) -> CacheResult<Vec<CacheEntry<V>>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read(&self.path)?;
        Ok(serde_json::from_slice(&contents)?)
    }
}

/// In-memory snapshot store (for testing).
pub struct InMemorySnapshot<V> {
    data: Mutex<Vec<CacheEntry<V>>>,
}

impl<V> InMemorySnapshot<V> {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(Vec::new()),
        }
    }
}

impl<V> Default for InMemorySnapshot<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> SnapshotStore<V> for InMemorySnapshot<V>
where
    V: Clone + Send + Sync,
{
    fn save(&self, entries: &[CacheEntry<V>]) -> CacheResult<()> {
        *self.data.lock() = entries.to_vec();
        Ok(())
    }

    fn load(&self) -> CacheResult<Vec<CacheEntry<V>>> {
        Ok(self.data.lock().clone())
    }
}

//! Model persistence: keep trained models across restarts.
//!
//! Provides the `ModelStore` trait, a `JsonFileModelStore` writing one
//! JSON artifact per metric and an `InMemoryModelStore`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::artifact::ModelArtifact;
use crate::error::AnomalyResult;

/// Storage for trained model artifacts, one per metric.
///
/// A load error means "no usable model": the engine logs it and retrains.
pub trait ModelStore: Send + Sync {
    fn save(&self, artifact: &ModelArtifact) -> AnomalyResult<()>;

    /// `Ok(None)` when nothing was stored for `metric`.
    fn load(&self, metric: &str) -> AnomalyResult<Option<ModelArtifact>>;

    fn remove(&self, metric: &str) -> AnomalyResult<()>;
}

/// One `<metric>.model.json` file per metric under a directory.
///
/// Writes are atomic (write to `.tmp`, then rename) so an interrupted
/// write never leaves a truncated artifact behind.
pub struct JsonFileModelStore {
    dir: PathBuf,
}

impl JsonFileModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `metric`. Characters unsafe in file names are
    /// percent-encoded, so distinct metrics never share a file.
    pub fn path_for(&self, metric: &str) -> PathBuf {
        let mut name = String::with_capacity(metric.len());
        let mut buf = [0u8; 4];
        for c in metric.chars() {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                name.push(c);
            } else {
                for byte in c.encode_utf8(&mut buf).bytes() {
                    name.push('%');
                    name.push_str(&hex::encode_upper([byte]));
                }
            }
        }
        self.dir.join(format!("{}.model.json", name))
    }
}

impl ModelStore for JsonFileModelStore {
    fn save(&self, artifact: &ModelArtifact) -> AnomalyResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_vec_pretty(artifact)?;

        let path = self.path_for(&artifact.metric);
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn load(&self, metric: &str) -> AnomalyResult<Option<ModelArtifact>> {
        let path = self.path_for(metric);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&contents)?))
    }

    fn remove(&self, metric: &str) -> AnomalyResult<()> {
        let path = self.path_for(metric);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// In-memory model store (for testing).
#[derive(Default)]
pub struct InMemoryModelStore {
    artifacts: Mutex<HashMap<String, ModelArtifact>>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.artifacts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.lock().is_empty()
    }
}

impl ModelStore for InMemoryModelStore {
    fn save(&self, artifact: &ModelArtifact) -> AnomalyResult<()> {
        self.artifacts
            .lock()
            .insert(artifact.metric.clone(), artifact.clone());
        Ok(())
    }

    fn load(&self, metric: &str) -> AnomalyResult<Option<ModelArtifact>> {
        Ok(self.artifacts.lock().get(metric).cloned())
    }

    fn remove(&self, metric: &str) -> AnomalyResult<()> {
        self.artifacts.lock().remove(metric);
        Ok(())
    }
}

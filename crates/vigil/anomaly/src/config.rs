//! Detector selection and per-metric configuration.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    DEFAULT_CONTAMINATION, DEFAULT_MAX_HISTORY, DEFAULT_MIN_SAMPLES, DEFAULT_N_ESTIMATORS,
    DEFAULT_RETRAIN_INTERVAL_SECS, DEFAULT_SEED, DEFAULT_THRESHOLD, DEFAULT_WINDOW_SIZE,
};

/// Detection algorithm. Chosen once per metric from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Random isolation trees over window features.
    IsolationForest,
    /// Gaussian envelope (mean and inverse covariance) over window features.
    EllipticEnvelope,
    ZScore,
    Iqr,
    /// One-dimensional Mahalanobis distance with an in-sample percentile cut.
    Mahalanobis,
}

impl Algorithm {
    /// Whether this algorithm needs a trained model.
    pub fn is_model_based(&self) -> bool {
        matches!(self, Algorithm::IsolationForest | Algorithm::EllipticEnvelope)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::IsolationForest => "isolation_forest",
            Algorithm::EllipticEnvelope => "elliptic_envelope",
            Algorithm::ZScore => "z_score",
            Algorithm::Iqr => "iqr",
            Algorithm::Mahalanobis => "mahalanobis",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_algorithm() -> Algorithm {
    Algorithm::IsolationForest
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_contamination() -> f64 {
    DEFAULT_CONTAMINATION
}

fn default_min_samples() -> usize {
    DEFAULT_MIN_SAMPLES
}

fn default_retrain_interval() -> Duration {
    Duration::from_secs(DEFAULT_RETRAIN_INTERVAL_SECS)
}

fn default_enabled() -> bool {
    true
}

fn default_n_estimators() -> usize {
    DEFAULT_N_ESTIMATORS
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}

/// Detection settings for one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyConfig {
    #[serde(default = "default_algorithm")]
    pub algorithm: Algorithm,

    /// Points per feature window (model-based algorithms).
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Normalized score above which a window is flagged (model-based).
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Expected share of anomalous training windows, trimmed before the final fit.
    #[serde(default = "default_contamination")]
    pub contamination: f64,

    /// Shorter series are ignored.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Model age at which the next detection retrains first.
    #[serde(default = "default_retrain_interval", with = "vigil_types::duration_serde")]
    pub retrain_interval: Duration,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Trees per isolation forest.
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,

    /// Seed for tree construction.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            window_size: default_window_size(),
            threshold: default_threshold(),
            contamination: default_contamination(),
            min_samples: default_min_samples(),
            retrain_interval: default_retrain_interval(),
            enabled: default_enabled(),
            n_estimators: default_n_estimators(),
            seed: default_seed(),
        }
    }
}

impl AnomalyConfig {
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size.max(1);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples;
        self
    }

    pub fn with_retrain_interval(mut self, interval: Duration) -> Self {
        self.retrain_interval = interval;
        self
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyEngineConfig {
    /// Settings for metrics without an override.
    #[serde(default)]
    pub defaults: AnomalyConfig,

    /// Per-metric overrides.
    #[serde(default)]
    pub metrics: HashMap<String, AnomalyConfig>,

    /// Maximum detection results kept in history.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

impl Default for AnomalyEngineConfig {
    fn default() -> Self {
        Self {
            defaults: AnomalyConfig::default(),
            metrics: HashMap::new(),
            max_history: default_max_history(),
        }
    }
}

impl AnomalyEngineConfig {
    /// Effective settings for `metric`.
    pub fn config_for(&self, metric: &str) -> &AnomalyConfig {
        self.metrics.get(metric).unwrap_or(&self.defaults)
    }
}

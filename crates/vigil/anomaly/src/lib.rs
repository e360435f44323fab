//! # Vigil Anomaly - Outlier detection over metric series
//!
//! The [`AnomalyEngine`] owns one model slot per metric and picks the
//! detector configured for it:
//!
//! ```text
//!   values ──► min_samples? ──► model-based?
//!                                 │ yes                       │ no
//!                                 ▼                           ▼
//!                   sliding windows (8 features)      z-score / IQR /
//!                                 │                   Mahalanobis
//!                   stored model fresh? ── no ──► train (trim contamination)
//!                                 │                           │
//!                                 ▼                           ▼
//!                   score ► normalize ► > threshold ◄── persist artifact
//! ```
//!
//! A series shorter than the feature window, or a metric whose model cannot
//! be trained, is tested with the unwindowed z-score instead. Stored
//! artifacts that are missing, unreadable or trained under different
//! settings are simply retrained.

#![deny(unsafe_code)]

pub mod artifact;
pub mod config;
pub mod detectors;
pub mod engine;
pub mod error;
pub mod features;
pub mod models;
pub mod persistence;

pub use artifact::{ModelArtifact, ARTIFACT_FORMAT_VERSION};
pub use config::{Algorithm, AnomalyConfig, AnomalyEngineConfig};
pub use detectors::{
    Detector, IqrDetector, MahalanobisDetector, PointAnomaly, StatisticalDetector, ZScoreDetector,
};
pub use engine::{AnomalyEngine, AnomalyStats, DetectionResult, ModelInfo};
pub use error::{AnomalyError, AnomalyResult};
pub use models::{ModelState, ModelTrainer, ReferenceScores};
pub use persistence::{InMemoryModelStore, JsonFileModelStore, ModelStore};

/// Points per feature window.
pub const DEFAULT_WINDOW_SIZE: usize = 100;

/// Normalized model score above which a point is flagged.
pub const DEFAULT_THRESHOLD: f64 = 0.95;

/// Expected share of anomalous training windows.
pub const DEFAULT_CONTAMINATION: f64 = 0.1;

pub const DEFAULT_MIN_SAMPLES: usize = 10;

/// 24 hours.
pub const DEFAULT_RETRAIN_INTERVAL_SECS: u64 = 24 * 60 * 60;

pub const DEFAULT_N_ESTIMATORS: usize = 100;

pub const DEFAULT_SEED: u64 = 42;

pub const DEFAULT_MAX_HISTORY: usize = 10_000;

//! Versioned, inspectable model artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{Algorithm, AnomalyConfig};
use crate::error::{AnomalyError, AnomalyResult};
use crate::features::FeatureVector;
use crate::models::{ModelState, ReferenceScores};

/// Bumped whenever the layout of [`ModelArtifact`] or [`ModelState`] changes.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// A trained model for one metric, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub metric: String,
    pub algorithm: Algorithm,
    pub window_size: usize,
    pub contamination: f64,
    /// Version of the artifact: a retrain always produces a later one.
    pub trained_at: DateTime<Utc>,
    /// Feature windows the model was trained on.
    pub n_samples: usize,
    pub reference_scores: ReferenceScores,
    pub state: ModelState,
}

impl ModelArtifact {
    pub fn new(
        metric: impl Into<String>,
        config: &AnomalyConfig,
        n_samples: usize,
        state: ModelState,
        reference_scores: ReferenceScores,
    ) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            metric: metric.into(),
            algorithm: state.algorithm(),
            window_size: config.window_size,
            contamination: config.contamination,
            trained_at: Utc::now(),
            n_samples,
            reference_scores,
            state,
        }
    }

    /// Normalized anomaly score in `[0, 1]`.
    pub fn score(&self, x: &FeatureVector) -> f64 {
        self.reference_scores.normalize(self.state.raw_score(x))
    }

    /// Reject an artifact that cannot serve `metric` under `config`.
    pub fn validate(&self, metric: &str, config: &AnomalyConfig) -> AnomalyResult<()> {
        let reason = if self.format_version != ARTIFACT_FORMAT_VERSION {
            format!(
                "format version {} (expected {})",
                self.format_version, ARTIFACT_FORMAT_VERSION
            )
        } else if self.metric != metric {
            format!("trained for metric '{}'", self.metric)
        } else if self.algorithm != config.algorithm || self.state.algorithm() != config.algorithm
        {
            format!("algorithm {} (configured {})", self.algorithm, config.algorithm)
        } else if self.window_size != config.window_size {
            format!("window size {} (configured {})", self.window_size, config.window_size)
        } else if (self.contamination - config.contamination).abs() > f64::EPSILON {
            format!(
                "contamination {} (configured {})",
                self.contamination, config.contamination
            )
        } else {
            return Ok(());
        };
        Err(AnomalyError::InvalidArtifact(reason))
    }

    /// Whether the model is at least `config.retrain_interval` old.
    pub fn is_stale(&self, config: &AnomalyConfig, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(config.retrain_interval) {
            Ok(interval) => now.signed_duration_since(self.trained_at) >= interval,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::sliding_features;
    use crate::models::{train, EllipticEnvelopeTrainer};
    use std::time::Duration;

    fn artifact(config: &AnomalyConfig) -> ModelArtifact {
        let values: Vec<f64> = (0..60).map(|i| (i % 9) as f64).collect();
        let windows = sliding_features(&values, config.window_size);
        let (state, reference) = train(&EllipticEnvelopeTrainer, &windows, 0.1).unwrap();
        ModelArtifact::new("latency", config, windows.len(), state, reference)
    }

    fn envelope_config() -> AnomalyConfig {
        AnomalyConfig::default()
            .with_algorithm(Algorithm::EllipticEnvelope)
            .with_window_size(5)
    }

    #[test]
    fn test_validate_rejects_mismatches() {
        let config = envelope_config();
        let art = artifact(&config);
        assert!(art.validate("latency", &config).is_ok());
        assert!(art.validate("cpu", &config).is_err());
        assert!(art.validate("latency", &config.clone().with_window_size(6)).is_err());
        assert!(art
            .validate("latency", &config.clone().with_algorithm(Algorithm::IsolationForest))
            .is_err());

        let mut old = art.clone();
        old.format_version = 0;
        assert!(matches!(
            old.validate("latency", &config),
            Err(AnomalyError::InvalidArtifact(_))
        ));
    }

    #[test]
    fn test_staleness() {
        let config = envelope_config().with_retrain_interval(Duration::from_secs(60));
        let art = artifact(&config);
        assert!(!art.is_stale(&config, art.trained_at));
        assert!(art.is_stale(&config, art.trained_at + chrono::Duration::seconds(60)));
    }
}

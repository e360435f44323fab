//! Detector contracts and the algorithm factory.

mod statistical;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{Algorithm, AnomalyConfig};
use crate::models::{EllipticEnvelopeTrainer, IsolationForestTrainer, ModelTrainer};

pub use statistical::{IqrDetector, MahalanobisDetector, ZScoreDetector, Z_SCORE_THRESHOLD};

/// A flagged point in a series, before it is stamped with metric and time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointAnomaly {
    /// Position in the analysed series.
    pub index: usize,
    pub value: f64,
    pub score: f64,
    pub confidence: f64,
    /// Cut the score was compared against.
    pub threshold: f64,
    /// Statistics behind the decision (mean/std, bounds, distances).
    pub context: BTreeMap<String, f64>,
}

/// Point-level test over a raw series. Needs no training.
pub trait StatisticalDetector: Send + Sync {
    fn detect(&self, values: &[f64]) -> Vec<PointAnomaly>;

    fn algorithm(&self) -> Algorithm;
}

/// Detector chosen for a metric from its configuration.
pub enum Detector {
    Statistical(Box<dyn StatisticalDetector>),
    Model(Box<dyn ModelTrainer>),
}

impl Detector {
    pub fn for_config(config: &AnomalyConfig) -> Self {
        match config.algorithm {
            Algorithm::IsolationForest => Detector::Model(Box::new(IsolationForestTrainer::new(
                config.n_estimators,
                config.seed,
            ))),
            Algorithm::EllipticEnvelope => Detector::Model(Box::new(EllipticEnvelopeTrainer)),
            Algorithm::ZScore => Detector::Statistical(Box::new(ZScoreDetector::default())),
            Algorithm::Iqr => Detector::Statistical(Box::new(IqrDetector::default())),
            Algorithm::Mahalanobis => {
                Detector::Statistical(Box::new(MahalanobisDetector::default()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_matches_algorithm() {
        for algorithm in [
            Algorithm::IsolationForest,
            Algorithm::EllipticEnvelope,
            Algorithm::ZScore,
            Algorithm::Iqr,
            Algorithm::Mahalanobis,
        ] {
            let config = AnomalyConfig::default().with_algorithm(algorithm);
            let built = match Detector::for_config(&config) {
                Detector::Statistical(d) => d.algorithm(),
                Detector::Model(t) => t.algorithm(),
            };
            assert_eq!(built, algorithm);
        }
    }
}

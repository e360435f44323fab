//! Trained outlier models over window feature vectors.
//!
//! A model only stores numeric parameters (tree nodes, or a mean and an
//! inverse covariance). Raw scores are model specific; [`ReferenceScores`]
//! maps them onto `[0, 1]` through the distribution of scores seen on the
//! training windows.

mod elliptic;
mod isolation_forest;

use serde::{Deserialize, Serialize};

use crate::config::Algorithm;
use crate::error::{AnomalyError, AnomalyResult};
use crate::features::{quantile_sorted, sorted_copy, FeatureVector};

pub use elliptic::{EllipticEnvelope, EllipticEnvelopeTrainer};
pub use isolation_forest::{IsolationForest, IsolationForestTrainer, IsolationNode, IsolationTree};

/// Fewest feature windows a model is trained on.
pub const MIN_TRAINING_WINDOWS: usize = 10;

/// Quantiles kept of the training score distribution.
const REFERENCE_QUANTILES: usize = 101;

/// Fits one kind of model.
pub trait ModelTrainer: Send + Sync {
    fn fit(&self, windows: &[FeatureVector]) -> AnomalyResult<ModelState>;

    fn algorithm(&self) -> Algorithm;
}

/// Serialisable parameters of a fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelState {
    IsolationForest(IsolationForest),
    EllipticEnvelope(EllipticEnvelope),
}

impl ModelState {
    /// Higher is more anomalous.
    pub fn raw_score(&self, x: &FeatureVector) -> f64 {
        match self {
            ModelState::IsolationForest(forest) => forest.score(x),
            ModelState::EllipticEnvelope(envelope) => envelope.score(x),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            ModelState::IsolationForest(_) => Algorithm::IsolationForest,
            ModelState::EllipticEnvelope(_) => Algorithm::EllipticEnvelope,
        }
    }
}

/// Empirical distribution of raw training scores, stored as quantiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceScores {
    pub quantiles: Vec<f64>,
}

impl ReferenceScores {
    pub fn from_scores(scores: &[f64]) -> Self {
        let sorted = sorted_copy(scores);
        let last = (REFERENCE_QUANTILES - 1) as f64;
        let quantiles = (0..REFERENCE_QUANTILES)
            .map(|i| quantile_sorted(&sorted, i as f64 / last))
            .collect();
        Self { quantiles }
    }

    /// Share of the reference distribution strictly below `raw`.
    ///
    /// Ties count as not exceeded, so a window scoring like every training
    /// window normalizes to 0.
    pub fn normalize(&self, raw: f64) -> f64 {
        if self.quantiles.is_empty() {
            return 0.0;
        }
        let below = self.quantiles.iter().filter(|q| **q < raw).count();
        below as f64 / self.quantiles.len() as f64
    }
}

/// Fit, drop the most anomalous `contamination` share of the training
/// windows, refit on the rest and record the reference score distribution.
pub fn train(
    trainer: &dyn ModelTrainer,
    windows: &[FeatureVector],
    contamination: f64,
) -> AnomalyResult<(ModelState, ReferenceScores)> {
    if windows.len() < MIN_TRAINING_WINDOWS {
        return Err(AnomalyError::InsufficientData {
            needed: MIN_TRAINING_WINDOWS,
            got: windows.len(),
        });
    }

    let initial = trainer.fit(windows)?;
    let trim = (windows.len() as f64 * contamination.clamp(0.0, 0.5)).floor() as usize;

    let state = if trim > 0 && windows.len() - trim >= MIN_TRAINING_WINDOWS {
        let mut scored: Vec<(f64, &FeatureVector)> =
            windows.iter().map(|w| (initial.raw_score(w), w)).collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        let clean: Vec<FeatureVector> = scored[..windows.len() - trim]
            .iter()
            .map(|(_, w)| **w)
            .collect();
        trainer.fit(&clean)?
    } else {
        initial
    };

    let raw: Vec<f64> = windows.iter().map(|w| state.raw_score(w)).collect();
    if raw.iter().any(|s| !s.is_finite()) {
        return Err(AnomalyError::Training(
            "model produced non-finite scores".to_string(),
        ));
    }

    Ok((state, ReferenceScores::from_scores(&raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::sliding_features;

    fn series_with_spike() -> Vec<f64> {
        let mut values: Vec<f64> = (0..200)
            .map(|i| 50.0 + 5.0 * (i as f64 * 0.3).sin() + ((i * 37 % 11) as f64 - 5.0) * 0.2)
            .collect();
        values[150] = 500.0;
        values
    }

    #[test]
    fn test_reference_normalization() {
        let reference = ReferenceScores::from_scores(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(reference.quantiles.len(), 101);
        assert_eq!(reference.normalize(0.5), 0.0);
        assert_eq!(reference.normalize(1.0), 0.0);
        assert_eq!(reference.normalize(10.0), 1.0);
        let mid = reference.normalize(3.0);
        assert!(mid > 0.4 && mid < 0.6);
    }

    #[test]
    fn test_train_rejects_few_windows() {
        let windows = sliding_features(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3);
        let result = train(&EllipticEnvelopeTrainer, &windows, 0.1);
        assert!(matches!(result, Err(AnomalyError::InsufficientData { .. })));
    }

    #[test]
    fn test_both_models_rank_spike_window_high() {
        let windows = sliding_features(&series_with_spike(), 5);
        // Series index 150 is window 146
        let spike = windows[146];

        let trainers: [Box<dyn ModelTrainer>; 2] = [
            Box::new(IsolationForestTrainer::new(100, 42)),
            Box::new(EllipticEnvelopeTrainer),
        ];
        for trainer in trainers.iter() {
            let (state, reference) = train(trainer.as_ref(), &windows, 0.1).unwrap();
            assert_eq!(state.algorithm(), trainer.algorithm());
            assert!(reference.normalize(state.raw_score(&spike)) > 0.95);
        }
    }

    #[test]
    fn test_state_serializes_with_kind_tag() {
        let windows = sliding_features(&series_with_spike(), 5);
        let (state, _) = train(&EllipticEnvelopeTrainer, &windows, 0.1).unwrap();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["kind"], "elliptic_envelope");
        let back: ModelState = serde_json::from_value(json).unwrap();
        assert_eq!(back.algorithm(), Algorithm::EllipticEnvelope);
        let x = windows[10];
        assert!((back.raw_score(&x) - state.raw_score(&x)).abs() < 1e-6 * (1.0 + state.raw_score(&x)));
    }
}

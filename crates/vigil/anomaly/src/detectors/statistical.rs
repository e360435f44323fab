//! Statistical point tests: z-score, IQR fences and Mahalanobis distance.

use std::collections::BTreeMap;

use crate::config::Algorithm;
use crate::features::{mean, quantile_sorted, sorted_copy, std_dev};

use super::{PointAnomaly, StatisticalDetector};

/// Default z-score cut.
pub const Z_SCORE_THRESHOLD: f64 = 2.5;

// ── 1. Z-score ──────────────────────────────────────────────────────────

/// Flags points more than `threshold` population standard deviations
/// from the series mean. A constant series flags nothing.
pub struct ZScoreDetector {
    pub threshold: f64,
}

impl Default for ZScoreDetector {
    fn default() -> Self {
        Self {
            threshold: Z_SCORE_THRESHOLD,
        }
    }
}

impl StatisticalDetector for ZScoreDetector {
    fn detect(&self, values: &[f64]) -> Vec<PointAnomaly> {
        let m = mean(values);
        let std = std_dev(values, 0);
        if std < f64::EPSILON {
            return Vec::new();
        }

        values
            .iter()
            .enumerate()
            .filter_map(|(index, &value)| {
                let z = (value - m).abs() / std;
                (z > self.threshold).then(|| PointAnomaly {
                    index,
                    value,
                    score: z / self.threshold,
                    confidence: (z / self.threshold).min(1.0),
                    threshold: self.threshold,
                    context: BTreeMap::from([
                        ("z_score".to_string(), z),
                        ("mean".to_string(), m),
                        ("std".to_string(), std),
                    ]),
                })
            })
            .collect()
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::ZScore
    }
}

// ── 2. IQR fences ───────────────────────────────────────────────────────

/// Flags points outside `[Q1 - k·IQR, Q3 + k·IQR]`.
pub struct IqrDetector {
    pub factor: f64,
}

impl Default for IqrDetector {
    fn default() -> Self {
        Self { factor: 1.5 }
    }
}

impl StatisticalDetector for IqrDetector {
    fn detect(&self, values: &[f64]) -> Vec<PointAnomaly> {
        if values.len() < 4 {
            return Vec::new();
        }

        let sorted = sorted_copy(values);
        let q1 = quantile_sorted(&sorted, 0.25);
        let q3 = quantile_sorted(&sorted, 0.75);
        let iqr = q3 - q1;
        if iqr < f64::EPSILON {
            return Vec::new();
        }

        let lower = q1 - self.factor * iqr;
        let upper = q3 + self.factor * iqr;

        values
            .iter()
            .enumerate()
            .filter_map(|(index, &value)| {
                let distance = if value < lower {
                    lower - value
                } else if value > upper {
                    value - upper
                } else {
                    return None;
                };
                let score = (distance / iqr).min(1.0);
                Some(PointAnomaly {
                    index,
                    value,
                    score,
                    confidence: score,
                    threshold: self.factor,
                    context: BTreeMap::from([
                        ("q1".to_string(), q1),
                        ("q3".to_string(), q3),
                        ("iqr".to_string(), iqr),
                        ("lower_bound".to_string(), lower),
                        ("upper_bound".to_string(), upper),
                    ]),
                })
            })
            .collect()
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::Iqr
    }
}

// ── 3. Mahalanobis ──────────────────────────────────────────────────────

/// Distance from the sample mean under the sample variance; flags points
/// beyond the `percentile` of in-sample distances.
pub struct MahalanobisDetector {
    pub percentile: f64,
}

impl Default for MahalanobisDetector {
    fn default() -> Self {
        Self { percentile: 0.95 }
    }
}

impl StatisticalDetector for MahalanobisDetector {
    fn detect(&self, values: &[f64]) -> Vec<PointAnomaly> {
        let m = mean(values);
        let std = std_dev(values, 1);
        if std < f64::EPSILON {
            return Vec::new();
        }

        let distances: Vec<f64> = values.iter().map(|v| (v - m).abs() / std).collect();
        let cut = quantile_sorted(&sorted_copy(&distances), self.percentile);

        values
            .iter()
            .zip(&distances)
            .enumerate()
            .filter_map(|(index, (&value, &distance))| {
                if distance <= cut {
                    return None;
                }
                let score = if cut < f64::EPSILON {
                    1.0
                } else {
                    (distance / cut).min(1.0)
                };
                Some(PointAnomaly {
                    index,
                    value,
                    score,
                    confidence: score,
                    threshold: cut,
                    context: BTreeMap::from([
                        ("distance".to_string(), distance),
                        ("mean".to_string(), m),
                        ("std".to_string(), std),
                    ]),
                })
            })
            .collect()
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::Mahalanobis
    }
}

//! Gaussian envelope: squared Mahalanobis distance from the training mean.

use serde::{Deserialize, Serialize};

use crate::config::Algorithm;
use crate::error::{AnomalyError, AnomalyResult};
use crate::features::{FeatureVector, FEATURE_COUNT};

use super::{ModelState, ModelTrainer};

/// Relative ridge added to the covariance diagonal. Window features are
/// linearly dependent (the mean is a combination of order statistics for
/// small windows), so the raw covariance is singular.
const RIDGE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EllipticEnvelope {
    pub mean: Vec<f64>,
    /// Inverse of the regularized covariance, row major.
    pub precision: Vec<Vec<f64>>,
}

impl EllipticEnvelope {
    pub fn score(&self, x: &FeatureVector) -> f64 {
        let diff: Vec<f64> = x.iter().zip(&self.mean).map(|(v, m)| v - m).collect();
        self.precision
            .iter()
            .zip(&diff)
            .map(|(row, di)| di * row.iter().zip(&diff).map(|(p, dj)| p * dj).sum::<f64>())
            .sum()
    }
}

pub struct EllipticEnvelopeTrainer;

impl ModelTrainer for EllipticEnvelopeTrainer {
    fn fit(&self, windows: &[FeatureVector]) -> AnomalyResult<ModelState> {
        if windows.len() < 2 {
            return Err(AnomalyError::Training(
                "envelope needs at least two windows".to_string(),
            ));
        }

        let n = windows.len() as f64;
        let mut mean = vec![0.0; FEATURE_COUNT];
        for w in windows {
            for (m, v) in mean.iter_mut().zip(w) {
                *m += v / n;
            }
        }

        let mut cov = vec![vec![0.0; FEATURE_COUNT]; FEATURE_COUNT];
        for w in windows {
            for i in 0..FEATURE_COUNT {
                let di = w[i] - mean[i];
                for j in i..FEATURE_COUNT {
                    cov[i][j] += di * (w[j] - mean[j]) / n;
                }
            }
        }
        for i in 0..FEATURE_COUNT {
            for j in 0..i {
                cov[i][j] = cov[j][i];
            }
        }

        let trace: f64 = (0..FEATURE_COUNT).map(|i| cov[i][i]).sum();
        let ridge = RIDGE * (trace / FEATURE_COUNT as f64) + 1e-9;
        for (i, row) in cov.iter_mut().enumerate() {
            row[i] += ridge;
        }

        let precision = invert(cov)?;
        Ok(ModelState::EllipticEnvelope(EllipticEnvelope { mean, precision }))
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::EllipticEnvelope
    }
}

/// Gauss-Jordan inversion with partial pivoting.
fn invert(mut a: Vec<Vec<f64>>) -> AnomalyResult<Vec<Vec<f64>>> {
    let n = a.len();
    let mut inv: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&x, &y| a[x][col].abs().total_cmp(&a[y][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-300 || !a[pivot][col].is_finite() {
            return Err(AnomalyError::Training("singular covariance".to_string()));
        }
        a.swap(col, pivot);
        inv.swap(col, pivot);

        let p = a[col][col];
        for j in 0..n {
            a[col][j] /= p;
            inv[col][j] /= p;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                a[row][j] -= factor * a[col][j];
                inv[row][j] -= factor * inv[col][j];
            }
        }
    }

    Ok(inv)
}

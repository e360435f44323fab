//! Isolation forest: points isolated by few random splits are anomalous.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::Algorithm;
use crate::error::{AnomalyError, AnomalyResult};
use crate::features::{FeatureVector, FEATURE_COUNT};

use super::{ModelState, ModelTrainer};

/// Largest subsample a single tree is grown from.
const MAX_SAMPLE_SIZE: usize = 256;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful search in a binary search tree
/// of `n` points. Normalizes path lengths across sample sizes.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        n => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IsolationNode {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Arena of nodes; the root is node 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationTree {
    pub nodes: Vec<IsolationNode>,
}

impl IsolationTree {
    fn path_length(&self, x: &FeatureVector) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match self.nodes.get(node) {
                Some(IsolationNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    node = if x[*feature] < *threshold { *left } else { *right };
                    depth += 1.0;
                }
                Some(IsolationNode::Leaf { size }) => return depth + average_path_length(*size),
                None => return depth,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    pub sample_size: usize,
    pub trees: Vec<IsolationTree>,
}

impl IsolationForest {
    /// `2^(-E[h(x)] / c(sample_size))`, in `(0, 1]`. About 0.5 for
    /// ordinary points, approaching 1 for isolated ones.
    pub fn score(&self, x: &FeatureVector) -> f64 {
        let c = average_path_length(self.sample_size);
        if self.trees.is_empty() || c == 0.0 {
            return 0.5;
        }
        let mean_path =
            self.trees.iter().map(|t| t.path_length(x)).sum::<f64>() / self.trees.len() as f64;
        2f64.powf(-mean_path / c)
    }
}

/// Grows `n_estimators` trees from seeded random subsamples. Training the
/// same windows with the same seed yields the same forest.
pub struct IsolationForestTrainer {
    n_estimators: usize,
    seed: u64,
}

impl IsolationForestTrainer {
    pub fn new(n_estimators: usize, seed: u64) -> Self {
        Self {
            n_estimators: n_estimators.max(1),
            seed,
        }
    }
}

impl ModelTrainer for IsolationForestTrainer {
    fn fit(&self, windows: &[FeatureVector]) -> AnomalyResult<ModelState> {
        if windows.len() < 2 {
            return Err(AnomalyError::Training(
                "forest needs at least two windows".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let sample_size = windows.len().min(MAX_SAMPLE_SIZE);
        let height_limit = (sample_size as f64).log2().ceil() as usize;

        let trees = (0..self.n_estimators)
            .map(|_| {
                let sample: Vec<FeatureVector> = index::sample(&mut rng, windows.len(), sample_size)
                    .iter()
                    .map(|i| windows[i])
                    .collect();
                let mut nodes = Vec::new();
                grow(&mut nodes, sample, 0, height_limit, &mut rng);
                IsolationTree { nodes }
            })
            .collect();

        Ok(ModelState::IsolationForest(IsolationForest { sample_size, trees }))
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::IsolationForest
    }
}

fn grow(
    nodes: &mut Vec<IsolationNode>,
    points: Vec<FeatureVector>,
    depth: usize,
    height_limit: usize,
    rng: &mut StdRng,
) -> usize {
    let id = nodes.len();
    nodes.push(IsolationNode::Leaf { size: points.len() });
    if depth >= height_limit || points.len() <= 1 {
        return id;
    }

    // Only features that still vary can split
    let candidates: Vec<(usize, f64, f64)> = (0..FEATURE_COUNT)
        .filter_map(|feature| {
            let (lo, hi) = points.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p[feature]), hi.max(p[feature]))
            });
            (hi - lo > f64::EPSILON).then_some((feature, lo, hi))
        })
        .collect();
    if candidates.is_empty() {
        return id;
    }

    let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
    let threshold = rng.gen_range(lo..hi);
    let (left_points, right_points): (Vec<_>, Vec<_>) =
        points.into_iter().partition(|p| p[feature] < threshold);

    let left = grow(nodes, left_points, depth + 1, height_limit, rng);
    let right = grow(nodes, right_points, depth + 1, height_limit, rng);
    nodes[id] = IsolationNode::Split {
        feature,
        threshold,
        left,
        right,
    };
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with_outlier() -> Vec<FeatureVector> {
        let mut windows: Vec<FeatureVector> = (0..60)
            .map(|i| {
                let v = 10.0 + (i % 7) as f64 * 0.1;
                [v, 0.5, v - 1.0, v + 1.0, v, v - 0.5, v + 0.5, v]
            })
            .collect();
        windows.push([90.0, 30.0, 10.0, 200.0, 80.0, 40.0, 120.0, 200.0]);
        windows
    }

    #[test]
    fn test_path_length_constants() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!(average_path_length(256) > 9.0);
    }

    #[test]
    fn test_outlier_scores_highest() {
        let windows = cluster_with_outlier();
        let ModelState::IsolationForest(forest) =
            IsolationForestTrainer::new(50, 7).fit(&windows).unwrap()
        else {
            panic!("wrong model kind");
        };

        let outlier = forest.score(&windows[60]);
        let typical = forest.score(&windows[3]);
        assert!(outlier > typical);
        assert!(outlier > 0.6);
        assert_eq!(forest.trees.len(), 50);
    }

    #[test]
    fn test_same_seed_same_forest() {
        let windows = cluster_with_outlier();
        let a = IsolationForestTrainer::new(10, 42).fit(&windows).unwrap();
        let b = IsolationForestTrainer::new(10, 42).fit(&windows).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_constant_windows_are_unsplittable() {
        let windows = vec![[3.0; FEATURE_COUNT]; 20];
        let ModelState::IsolationForest(forest) =
            IsolationForestTrainer::new(5, 1).fit(&windows).unwrap()
        else {
            panic!("wrong model kind");
        };
        assert!(forest
            .trees
            .iter()
            .all(|t| matches!(t.nodes.as_slice(), [IsolationNode::Leaf { size: 20 }])));
    }
}

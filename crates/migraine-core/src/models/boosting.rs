//! Gradient boosted trees with Newton leaves.
//!
//! One implementation covers the three boosting families in the catalog:
//! plain gradient boosting (`lambda = 0`, full rows), the regularized variant
//! (L2 leaf penalty plus row subsampling) and the histogram variant (split
//! search restricted to per-feature quantile bin edges).

use serde::{Deserialize, Serialize};

use super::rng::SplitMix64;
use super::tree::{Tree, TreeConfig};
use super::BoostingParams;
use crate::stats::{mean, quantile_edges, sigmoid};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedTrees {
    pub base_score: f64,
    pub learning_rate: f64,
    pub trees: Vec<Tree>,
    pub classification: bool,
}

impl BoostedTrees {
    pub(crate) fn fit(params: &BoostingParams, x: &[Vec<f64>], y: &[f64], classification: bool) -> BoostedTrees {
        let n = x.len();
        let n_features = x.first().map(|r| r.len()).unwrap_or(0);

        let base_score = if classification {
            let p = mean(y).clamp(1e-6, 1.0 - 1e-6);
            (p / (1.0 - p)).ln()
        } else {
            mean(y)
        };

        let bins: Option<Vec<Vec<f64>>> = params.bins.map(|b| {
            (0..n_features)
                .map(|f| {
                    let column: Vec<f64> = x.iter().map(|r| r[f]).collect();
                    quantile_edges(&column, b)
                })
                .collect()
        });

        let cfg = TreeConfig {
            max_depth: params.max_depth,
            min_samples_leaf: params.min_samples_leaf,
            max_features: None,
            lambda: params.l2_leaf,
        };

        let mut rng = SplitMix64::new(params.seed);
        let mut raw = vec![base_score; n];
        let mut grad = vec![0.0; n];
        let mut hess = vec![1.0; n];
        let mut trees = Vec::with_capacity(params.n_rounds);
        let sample_size = ((n as f64) * params.subsample).round().max(1.0) as usize;

        for _ in 0..params.n_rounds {
            for i in 0..n {
                if classification {
                    let p = sigmoid(raw[i]);
                    grad[i] = p - y[i];
                    hess[i] = (p * (1.0 - p)).max(1e-6);
                } else {
                    grad[i] = raw[i] - y[i];
                }
            }

            let rows: Vec<usize> = if sample_size < n {
                rng.sample_indices(n, sample_size)
            } else {
                (0..n).collect()
            };
            let tree = Tree::fit(x, &grad, &hess, &rows, &cfg, bins.as_deref(), &mut rng);
            for (i, row) in x.iter().enumerate() {
                raw[i] += params.learning_rate * tree.predict(row);
            }
            trees.push(tree);
        }

        BoostedTrees {
            base_score,
            learning_rate: params.learning_rate,
            trees,
            classification,
        }
    }

    /// Additive score: log-odds for classification, the value for regression.
    pub fn raw(&self, row: &[f64]) -> f64 {
        self.base_score
            + self.learning_rate * self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }

    pub fn is_finite(&self) -> bool {
        self.base_score.is_finite()
            && self.learning_rate.is_finite()
            && self.trees.iter().all(Tree::is_finite)
    }
}

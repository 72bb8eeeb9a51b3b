//! Bagged CART ensemble with per-split feature subsampling.

use serde::{Deserialize, Serialize};

use super::rng::SplitMix64;
use super::tree::{Tree, TreeConfig};
use super::{FeatureSubset, ForestParams};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forest {
    pub trees: Vec<Tree>,
    pub classification: bool,
}

impl Forest {
    /// Fit on 0/1 labels (leaves hold the positive fraction) or a continuous target.
    pub(crate) fn fit(params: &ForestParams, x: &[Vec<f64>], y: &[f64], classification: bool) -> Forest {
        let n = x.len();
        let n_features = x.first().map(|r| r.len()).unwrap_or(0);
        let cfg = TreeConfig {
            max_depth: params.max_depth,
            min_samples_leaf: params.min_samples_leaf,
            max_features: Some(params.max_features.resolve(n_features)),
            lambda: 0.0,
        };
        let grad: Vec<f64> = y.iter().map(|v| -v).collect();
        let hess = vec![1.0; n];

        let trees = (0..params.n_trees)
            .map(|t| {
                let mut rng = SplitMix64::derive(params.seed, t as u64);
                let rows = rng.bootstrap(n);
                Tree::fit(x, &grad, &hess, &rows, &cfg, None, &mut rng)
            })
            .collect();
        Forest {
            trees,
            classification,
        }
    }

    /// Mean of member outputs: the positive-class probability for
    /// classification, the predicted value for regression.
    pub fn raw(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn is_finite(&self) -> bool {
        self.trees.iter().all(Tree::is_finite)
    }
}

impl FeatureSubset {
    pub(crate) fn resolve(&self, n_features: usize) -> usize {
        let k = match self {
            FeatureSubset::Sqrt => (n_features as f64).sqrt().floor() as usize,
            FeatureSubset::Third => n_features / 3,
            FeatureSubset::All => n_features,
        };
        k.clamp(1, n_features.max(1))
    }
}

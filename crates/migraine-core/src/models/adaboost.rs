//! AdaBoost: SAMME with decision stumps for binary labels, AdaBoost.R2 with
//! shallow trees for regression.

use serde::{Deserialize, Serialize};

use super::rng::SplitMix64;
use super::tree::{Tree, TreeConfig};
use super::{AdaBoostParams, FitError};
use crate::stats::sigmoid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum AdaBoostModel {
    /// Weighted vote of stumps; `alphas[m]` is stump m's say.
    Samme { trees: Vec<Tree>, alphas: Vec<f64> },
    /// Weighted median of tree outputs with weights `ln(1 / beta_m)`.
    R2 { trees: Vec<Tree>, weights: Vec<f64> },
}

fn weighted_tree(
    x: &[Vec<f64>],
    y: &[f64],
    sample_weights: &[f64],
    cfg: &TreeConfig,
    rng: &mut SplitMix64,
) -> Tree {
    let grad: Vec<f64> = y.iter().zip(sample_weights).map(|(v, w)| -v * w).collect();
    let rows: Vec<usize> = (0..x.len()).collect();
    Tree::fit(x, &grad, sample_weights, &rows, cfg, None, rng)
}

fn normalize(w: &mut [f64]) {
    let total: f64 = w.iter().sum();
    if total > 0.0 {
        w.iter_mut().for_each(|v| *v /= total);
    }
}

impl AdaBoostModel {
    pub(crate) fn fit_samme(params: &AdaBoostParams, x: &[Vec<f64>], y: &[f64]) -> Result<Self, FitError> {
        let n = x.len();
        let cfg = TreeConfig {
            max_depth: params.max_depth,
            min_samples_leaf: 1,
            max_features: None,
            lambda: 0.0,
        };
        let mut rng = SplitMix64::new(params.seed);
        let mut w = vec![1.0 / n as f64; n];
        let mut trees = Vec::new();
        let mut alphas = Vec::new();

        for _ in 0..params.n_rounds {
            let tree = weighted_tree(x, y, &w, &cfg, &mut rng);
            let miss: Vec<bool> = x
                .iter()
                .zip(y)
                .map(|(r, target)| (tree.predict(r) >= 0.5) != (*target >= 0.5))
                .collect();
            let err: f64 = miss.iter().zip(&w).filter(|(m, _)| **m).map(|(_, w)| w).sum();

            if err <= 1e-12 {
                trees.push(tree);
                alphas.push(1.0);
                break;
            }
            if err >= 0.5 {
                if trees.is_empty() {
                    return Err(FitError::Diverged(format!(
                        "first stump no better than chance (weighted error {err:.3})"
                    )));
                }
                break;
            }

            let alpha = params.learning_rate * ((1.0 - err) / err).ln();
            for (wi, m) in w.iter_mut().zip(&miss) {
                if *m {
                    *wi *= alpha.exp();
                }
            }
            normalize(&mut w);
            trees.push(tree);
            alphas.push(alpha);
        }
        Ok(AdaBoostModel::Samme { trees, alphas })
    }

    pub(crate) fn fit_r2(params: &AdaBoostParams, x: &[Vec<f64>], y: &[f64]) -> Result<Self, FitError> {
        let n = x.len();
        let cfg = TreeConfig {
            max_depth: params.max_depth,
            min_samples_leaf: 1,
            max_features: None,
            lambda: 0.0,
        };
        let mut rng = SplitMix64::new(params.seed);
        let mut w = vec![1.0 / n as f64; n];
        let mut trees = Vec::new();
        let mut weights = Vec::new();

        for _ in 0..params.n_rounds {
            let tree = weighted_tree(x, y, &w, &cfg, &mut rng);
            let errors: Vec<f64> = x
                .iter()
                .zip(y)
                .map(|(r, target)| (tree.predict(r) - target).abs())
                .collect();
            let max_err = errors.iter().cloned().fold(0.0, f64::max);
            if max_err <= 1e-12 {
                trees.push(tree);
                weights.push(1.0);
                break;
            }

            let losses: Vec<f64> = errors.iter().map(|e| e / max_err).collect();
            let avg_loss: f64 = losses.iter().zip(&w).map(|(l, w)| l * w).sum();
            if avg_loss >= 0.5 {
                if trees.is_empty() {
                    trees.push(tree);
                    weights.push(1.0);
                }
                break;
            }
            if avg_loss <= 1e-12 {
                trees.push(tree);
                weights.push(1.0);
                break;
            }

            let beta = avg_loss / (1.0 - avg_loss);
            for (wi, l) in w.iter_mut().zip(&losses) {
                *wi *= beta.powf(params.learning_rate * (1.0 - l));
            }
            normalize(&mut w);
            trees.push(tree);
            weights.push(params.learning_rate * (1.0 / beta).ln());
        }
        Ok(AdaBoostModel::R2 { trees, weights })
    }

    /// Positive-class probability (SAMME) or the weighted-median estimate (R2).
    pub fn raw(&self, row: &[f64]) -> f64 {
        match self {
            AdaBoostModel::Samme { trees, alphas } => {
                let score: f64 = trees
                    .iter()
                    .zip(alphas)
                    .map(|(t, a)| if t.predict(row) >= 0.5 { *a } else { -*a })
                    .sum();
                sigmoid(2.0 * score)
            }
            AdaBoostModel::R2 { trees, weights } => {
                let mut preds: Vec<(f64, f64)> = trees
                    .iter()
                    .zip(weights)
                    .map(|(t, w)| (t.predict(row), *w))
                    .collect();
                preds.sort_by(|a, b| a.0.total_cmp(&b.0));
                let total: f64 = preds.iter().map(|(_, w)| w).sum();
                let mut acc = 0.0;
                for (p, w) in &preds {
                    acc += w;
                    if acc >= 0.5 * total {
                        return *p;
                    }
                }
                preds.last().map(|(p, _)| *p).unwrap_or(0.0)
            }
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            AdaBoostModel::Samme { trees, alphas } => {
                alphas.iter().all(|a| a.is_finite()) && trees.iter().all(Tree::is_finite)
            }
            AdaBoostModel::R2 { trees, weights } => {
                weights.iter().all(|w| w.is_finite()) && trees.iter().all(Tree::is_finite)
            }
        }
    }
}

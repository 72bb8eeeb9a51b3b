//! Linear estimators over standardized inputs: ridge (closed form),
//! L2 logistic regression (gradient descent), and hinge / epsilon-insensitive
//! linear SVMs (averaged SGD).

use serde::{Deserialize, Serialize};

use super::rng::SplitMix64;
use super::{FitError, LinearParams, SvmParams};
use crate::stats::{mean, sigmoid};

/// Column standardization fitted on the training split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Scaler {
    pub fn fit(x: &[Vec<f64>]) -> Scaler {
        let p = x.first().map(|r| r.len()).unwrap_or(0);
        let n = x.len().max(1) as f64;
        let mut mean = vec![0.0; p];
        for row in x {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        let mut scale = vec![0.0; p];
        for row in x {
            for j in 0..p {
                scale[j] += (row[j] - mean[j]).powi(2) / n;
            }
        }
        let scale = scale
            .into_iter()
            .map(|var| {
                let sd = var.sqrt();
                if sd > 1e-12 {
                    sd
                } else {
                    1.0
                }
            })
            .collect();
        Scaler { mean, scale }
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }

    pub fn is_finite(&self) -> bool {
        self.mean.iter().chain(&self.scale).all(|v| v.is_finite())
    }
}

/// Mapping from the linear decision value to the model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "link", rename_all = "snake_case")]
pub enum Link {
    /// Regression output
    Identity,
    /// Positive-class probability
    Logistic,
    /// Platt-scaled margin: `sigmoid(a * decision + b)`
    Platt { a: f64, b: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub scaler: Scaler,
    pub weights: Vec<f64>,
    pub bias: f64,
    pub link: Link,
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl LinearModel {
    pub fn decision(&self, row: &[f64]) -> f64 {
        dot(&self.weights, &self.scaler.transform(row)) + self.bias
    }

    /// Regression value, or positive-class probability for classifiers.
    pub fn output(&self, row: &[f64]) -> f64 {
        let d = self.decision(row);
        match self.link {
            Link::Identity => d,
            Link::Logistic => sigmoid(d),
            Link::Platt { a, b } => sigmoid(a * d + b),
        }
    }

    pub fn is_finite(&self) -> bool {
        let link_ok = match self.link {
            Link::Platt { a, b } => a.is_finite() && b.is_finite(),
            _ => true,
        };
        link_ok
            && self.bias.is_finite()
            && self.weights.iter().all(|w| w.is_finite())
            && self.scaler.is_finite()
    }

    /// Ridge regression via the normal equations `(XᵀX + αI) w = Xᵀ(y - ȳ)`.
    pub(crate) fn fit_ridge(params: &LinearParams, x: &[Vec<f64>], y: &[f64]) -> Result<Self, FitError> {
        let scaler = Scaler::fit(x);
        let z: Vec<Vec<f64>> = x.iter().map(|r| scaler.transform(r)).collect();
        let p = scaler.mean.len();
        let y_mean = mean(y);

        let mut gram = vec![vec![0.0; p]; p];
        let mut rhs = vec![0.0; p];
        for (row, target) in z.iter().zip(y) {
            for i in 0..p {
                rhs[i] += row[i] * (target - y_mean);
                for j in i..p {
                    gram[i][j] += row[i] * row[j];
                }
            }
        }
        for i in 0..p {
            for j in 0..i {
                gram[i][j] = gram[j][i];
            }
            gram[i][i] += params.alpha;
        }

        let weights = solve(gram, rhs)?;
        Ok(LinearModel {
            scaler,
            weights,
            bias: y_mean,
            link: Link::Identity,
        })
    }

    /// L2-penalized logistic regression by full-batch gradient descent.
    pub(crate) fn fit_logistic(params: &LinearParams, x: &[Vec<f64>], y: &[f64]) -> Result<Self, FitError> {
        let scaler = Scaler::fit(x);
        let z: Vec<Vec<f64>> = x.iter().map(|r| scaler.transform(r)).collect();
        let p = scaler.mean.len();
        let n = z.len() as f64;

        let mut w = vec![0.0; p];
        let mut b = 0.0;
        for _ in 0..params.max_iter {
            let mut gw = vec![0.0; p];
            let mut gb = 0.0;
            for (row, target) in z.iter().zip(y) {
                let err = sigmoid(dot(&w, row) + b) - target;
                for (g, v) in gw.iter_mut().zip(row) {
                    *g += err * v / n;
                }
                gb += err / n;
            }
            for (wj, g) in w.iter_mut().zip(&gw) {
                *wj -= params.learning_rate * (g + params.alpha * *wj / n);
            }
            b -= params.learning_rate * gb;
            if !b.is_finite() {
                return Err(FitError::Diverged("logistic regression".to_string()));
            }
        }

        Ok(LinearModel {
            scaler,
            weights: w,
            bias: b,
            link: Link::Logistic,
        })
    }

    /// Linear SVM: hinge loss by averaged SGD, then a Platt sigmoid fitted on
    /// the training margins for confidence.
    pub(crate) fn fit_svm(params: &SvmParams, x: &[Vec<f64>], y: &[f64]) -> Result<Self, FitError> {
        let signs: Vec<f64> = y.iter().map(|v| if *v >= 0.5 { 1.0 } else { -1.0 }).collect();
        let (scaler, weights, bias) = averaged_sgd(params, x, 0.0, |decision, i| {
            if signs[i] * decision < 1.0 {
                signs[i]
            } else {
                0.0
            }
        });

        let margins: Vec<f64> = x
            .iter()
            .map(|r| dot(&weights, &scaler.transform(r)) + bias)
            .collect();
        let (a, b) = platt(&margins, y);
        Ok(LinearModel {
            scaler,
            weights,
            bias,
            link: Link::Platt { a, b },
        })
    }

    /// Linear SVR: epsilon-insensitive loss by averaged SGD.
    pub(crate) fn fit_svr(params: &SvmParams, x: &[Vec<f64>], y: &[f64]) -> Result<Self, FitError> {
        let eps = params.epsilon;
        let (scaler, weights, bias) = averaged_sgd(params, x, mean(y), |decision, i| {
            let residual = y[i] - decision;
            if residual > eps {
                1.0
            } else if residual < -eps {
                -1.0
            } else {
                0.0
            }
        });
        Ok(LinearModel {
            scaler,
            weights,
            bias,
            link: Link::Identity,
        })
    }
}

/// Averaged SGD over standardized rows. `step(decision, i)` returns the
/// loss subgradient direction for sample `i` (0 when inside the margin).
fn averaged_sgd(
    params: &SvmParams,
    x: &[Vec<f64>],
    bias0: f64,
    step: impl Fn(f64, usize) -> f64,
) -> (Scaler, Vec<f64>, f64) {
    let scaler = Scaler::fit(x);
    let z: Vec<Vec<f64>> = x.iter().map(|r| scaler.transform(r)).collect();
    let p = scaler.mean.len();
    let n = z.len();
    let lambda = 1.0 / (params.c * n.max(1) as f64);
    let eta0 = 0.1;

    let mut rng = SplitMix64::new(params.seed);
    let mut order: Vec<usize> = (0..n).collect();
    let mut w = vec![0.0; p];
    let mut b = bias0;
    let mut w_avg = vec![0.0; p];
    let mut b_avg = 0.0;
    let mut t = 0.0;

    for _ in 0..params.epochs {
        rng.shuffle(&mut order);
        for &i in &order {
            t += 1.0;
            let eta = eta0 / (1.0 + eta0 * lambda * t);
            let direction = step(dot(&w, &z[i]) + b, i);
            for wj in w.iter_mut() {
                *wj *= 1.0 - eta * lambda;
            }
            if direction != 0.0 {
                for (wj, v) in w.iter_mut().zip(&z[i]) {
                    *wj += eta * direction * v;
                }
                b += eta * direction;
            }
            for (a, wj) in w_avg.iter_mut().zip(&w) {
                *a += (wj - *a) / t;
            }
            b_avg += (b - b_avg) / t;
        }
    }
    (scaler, w_avg, b_avg)
}

/// Fit `P(y=1 | f) = sigmoid(a f + b)` by gradient descent on log loss.
fn platt(margins: &[f64], y: &[f64]) -> (f64, f64) {
    let n = margins.len().max(1) as f64;
    let (mut a, mut b) = (1.0, 0.0);
    for _ in 0..300 {
        let (mut ga, mut gb) = (0.0, 0.0);
        for (f, target) in margins.iter().zip(y) {
            let err = sigmoid(a * f + b) - target;
            ga += err * f / n;
            gb += err / n;
        }
        a -= 0.5 * ga;
        b -= 0.5 * gb;
    }
    (a, b)
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut rhs: Vec<f64>) -> Result<Vec<f64>, FitError> {
    let p = rhs.len();
    let scale = a
        .iter()
        .enumerate()
        .map(|(i, r)| r[i].abs())
        .fold(1.0_f64, f64::max);

    for col in 0..p {
        let pivot = (col..p)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() <= 1e-10 * scale {
            return Err(FitError::Singular { column: col });
        }
        a.swap(col, pivot);
        rhs.swap(col, pivot);

        for row in col + 1..p {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..p {
                a[row][k] -= factor * a[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut out = vec![0.0; p];
    for row in (0..p).rev() {
        let tail: f64 = (row + 1..p).map(|k| a[row][k] * out[k]).sum();
        out[row] = (rhs[row] - tail) / a[row][row];
    }
    Ok(out)
}

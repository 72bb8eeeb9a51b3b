//! Candidate algorithm families and their fitted estimators.
//!
//! [`Algorithm`] is a closed set of variants with fixed hyperparameters; each
//! `fit` produces a [`FittedModel`] with uniform `predict_row` /
//! `predict_proba_row` capabilities. Everything is deterministic for a seed.

pub mod adaboost;
pub mod boosting;
pub mod forest;
pub mod knn;
pub mod linear;
pub mod rng;
pub mod tree;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{FeatureVector, PipelineError, Result, Task};

pub use adaboost::AdaBoostModel;
pub use boosting::BoostedTrees;
pub use forest::Forest;
pub use knn::NeighborsModel;
pub use linear::{Link, LinearModel, Scaler};

/// Why an estimator could not be fitted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FitError {
    #[error("singular system at column {column}")]
    Singular { column: usize },

    #[error("{0} diverged")]
    Diverged(String),

    #[error("non-finite parameters after fit")]
    NonFinite,

    #[error("{algorithm} does not support {task}")]
    Unsupported { algorithm: String, task: Task },

    #[error("invalid training data: {0}")]
    InvalidData(String),
}

/// Per-split feature subsampling for forests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSubset {
    Sqrt,
    Third,
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub max_features: FeatureSubset,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// L2 penalty on leaf values
    pub l2_leaf: f64,
    /// Fraction of rows drawn (without replacement) per round
    pub subsample: f64,
    /// Quantile bins per feature for histogram split search
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bins: Option<usize>,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearParams {
    /// L2 penalty strength
    pub alpha: f64,
    pub max_iter: usize,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvmParams {
    /// Inverse regularization strength
    pub c: f64,
    pub epochs: usize,
    /// Insensitive tube half-width (regression only)
    pub epsilon: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnParams {
    pub k: usize,
    pub weighted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaBoostParams {
    pub n_rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub seed: u64,
}

/// Algorithm family plus fixed hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Algorithm {
    RandomForest(ForestParams),
    RegularizedBoosting(BoostingParams),
    HistogramBoosting(BoostingParams),
    GradientBoosting(BoostingParams),
    LogisticRegression(LinearParams),
    Ridge(LinearParams),
    LinearSvm(SvmParams),
    LinearSvr(SvmParams),
    KNeighbors(KnnParams),
    AdaBoost(AdaBoostParams),
}

impl Algorithm {
    pub fn family(&self) -> &'static str {
        match self {
            Algorithm::RandomForest(_) => "random_forest",
            Algorithm::RegularizedBoosting(_) => "regularized_boosting",
            Algorithm::HistogramBoosting(_) => "histogram_boosting",
            Algorithm::GradientBoosting(_) => "gradient_boosting",
            Algorithm::LogisticRegression(_) => "logistic_regression",
            Algorithm::Ridge(_) => "ridge",
            Algorithm::LinearSvm(_) => "linear_svm",
            Algorithm::LinearSvr(_) => "linear_svr",
            Algorithm::KNeighbors(_) => "k_neighbors",
            Algorithm::AdaBoost(_) => "ada_boost",
        }
    }

    pub fn supports(&self, task: Task) -> bool {
        match self {
            Algorithm::LogisticRegression(_) | Algorithm::LinearSvm(_) => {
                task == Task::Classification
            }
            Algorithm::Ridge(_) | Algorithm::LinearSvr(_) => task == Task::Regression,
            _ => true,
        }
    }

    /// Fit on row-major `x` and targets `y` (0/1 labels for classification).
    pub fn fit(&self, task: Task, x: &[Vec<f64>], y: &[f64]) -> std::result::Result<FittedModel, FitError> {
        if !self.supports(task) {
            return Err(FitError::Unsupported {
                algorithm: self.family().to_string(),
                task,
            });
        }
        if x.is_empty() || x.len() != y.len() {
            return Err(FitError::InvalidData(format!(
                "{} rows for {} targets",
                x.len(),
                y.len()
            )));
        }
        if task == Task::Classification && y.iter().any(|v| *v != 0.0 && *v != 1.0) {
            return Err(FitError::InvalidData(
                "classification labels must be 0 or 1".to_string(),
            ));
        }

        let classification = task == Task::Classification;
        let estimator = match self {
            Algorithm::RandomForest(p) => Estimator::Forest(Forest::fit(p, x, y, classification)),
            Algorithm::RegularizedBoosting(p)
            | Algorithm::HistogramBoosting(p)
            | Algorithm::GradientBoosting(p) => {
                Estimator::Boosted(BoostedTrees::fit(p, x, y, classification))
            }
            Algorithm::LogisticRegression(p) => Estimator::Linear(LinearModel::fit_logistic(p, x, y)?),
            Algorithm::Ridge(p) => Estimator::Linear(LinearModel::fit_ridge(p, x, y)?),
            Algorithm::LinearSvm(p) => Estimator::Linear(LinearModel::fit_svm(p, x, y)?),
            Algorithm::LinearSvr(p) => Estimator::Linear(LinearModel::fit_svr(p, x, y)?),
            Algorithm::KNeighbors(p) => Estimator::Neighbors(NeighborsModel::fit(p, x, y)),
            Algorithm::AdaBoost(p) if classification => {
                Estimator::AdaBoost(AdaBoostModel::fit_samme(p, x, y)?)
            }
            Algorithm::AdaBoost(p) => Estimator::AdaBoost(AdaBoostModel::fit_r2(p, x, y)?),
        };

        let fitted = FittedModel {
            classification,
            estimator,
        };
        if !fitted.is_finite() {
            return Err(FitError::NonFinite);
        }
        Ok(fitted)
    }
}

/// A fitted estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub classification: bool,
    pub estimator: Estimator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Estimator {
    Forest(Forest),
    Boosted(BoostedTrees),
    Linear(LinearModel),
    Neighbors(NeighborsModel),
    AdaBoost(AdaBoostModel),
}

impl FittedModel {
    /// Positive-class probability for classification, the estimate for regression.
    fn raw(&self, row: &[f64]) -> f64 {
        match &self.estimator {
            Estimator::Forest(m) => m.raw(row),
            Estimator::Boosted(m) if self.classification => crate::stats::sigmoid(m.raw(row)),
            Estimator::Boosted(m) => m.raw(row),
            Estimator::Linear(m) => m.output(row),
            Estimator::Neighbors(m) => m.raw(row),
            Estimator::AdaBoost(m) => m.raw(row),
        }
    }

    /// Class label (0/1) for classification, value for regression.
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let raw = self.raw(row);
        if self.classification {
            if raw >= 0.5 {
                1.0
            } else {
                0.0
            }
        } else {
            raw
        }
    }

    /// Positive-class probability; `None` for regression models.
    pub fn predict_proba_row(&self, row: &[f64]) -> Option<f64> {
        self.classification.then(|| self.raw(row).clamp(0.0, 1.0))
    }

    pub fn is_finite(&self) -> bool {
        match &self.estimator {
            Estimator::Forest(m) => m.is_finite(),
            Estimator::Boosted(m) => m.is_finite(),
            Estimator::Linear(m) => m.is_finite(),
            Estimator::Neighbors(m) => m.is_finite(),
            Estimator::AdaBoost(m) => m.is_finite(),
        }
    }
}

/// Model output for one observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Class label (0/1) or severity estimate
    pub value: f64,
    /// Probability of the predicted class; for regression, the model's
    /// validation R² clamped to [0, 1]
    pub confidence: f64,
}

/// A fitted predictor bound to its candidate and feature order. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub candidate: String,
    pub task: Task,
    pub algorithm: Algorithm,
    /// Prediction inputs must match this order exactly
    pub feature_names: Vec<String>,
    pub fitted_at: DateTime<Utc>,
    /// Validation value of the task's primary metric
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_primary: Option<f64>,
    pub model: FittedModel,
}

impl TrainedModel {
    pub fn predict(&self, input: &FeatureVector) -> Result<Prediction> {
        if input.names != self.feature_names {
            return Err(PipelineError::FeatureMismatch {
                expected: self.feature_names.clone(),
                actual: input.names.clone(),
            });
        }
        let value = self.model.predict_row(&input.values);
        let confidence = match self.model.predict_proba_row(&input.values) {
            Some(p) if value == 1.0 => p,
            Some(p) => 1.0 - p,
            None => self.validation_primary.unwrap_or(0.0).clamp(0.0, 1.0),
        };
        Ok(Prediction { value, confidence })
    }

    /// Predictions for row-major inputs already in `feature_names` order.
    pub fn predict_rows(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|r| self.model.predict_row(r)).collect()
    }

    pub fn predict_proba_rows(&self, rows: &[Vec<f64>]) -> Option<Vec<f64>> {
        rows.iter().map(|r| self.model.predict_proba_row(r)).collect()
    }
}

//! Candidate catalogs: the fixed, ordered slate of algorithms per task.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain::{CandidateSpec, PipelineError, Result, Task};
use crate::models::{
    AdaBoostParams, Algorithm, BoostingParams, FeatureSubset, ForestParams, KnnParams, LinearParams,
    SvmParams,
};

/// Ordered, non-empty candidate list for one task. Names are unique and
/// every algorithm supports the task; catalog order is processing order and
/// the ranking tie-break.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateCatalog {
    task: Task,
    entries: Vec<CandidateSpec>,
}

impl CandidateCatalog {
    pub fn new(task: Task, entries: Vec<CandidateSpec>) -> Result<Self> {
        if entries.is_empty() {
            return Err(PipelineError::InvalidInput(format!(
                "{task} catalog is empty"
            )));
        }
        let mut names = HashSet::new();
        for spec in &entries {
            if !names.insert(spec.name.as_str()) {
                return Err(PipelineError::InvalidInput(format!(
                    "duplicate candidate name {} in {task} catalog",
                    spec.name
                )));
            }
            if spec.task != task {
                return Err(PipelineError::InvalidInput(format!(
                    "candidate {} targets {}, catalog is {task}",
                    spec.name, spec.task
                )));
            }
            if !spec.algorithm.supports(task) {
                return Err(PipelineError::InvalidInput(format!(
                    "candidate {} ({}) cannot serve {task}",
                    spec.name,
                    spec.algorithm.family()
                )));
            }
        }
        Ok(Self { task, entries })
    }

    pub fn task(&self) -> Task {
        self.task
    }

    pub fn entries(&self) -> &[CandidateSpec] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep only the named candidates, preserving catalog order.
    pub fn restrict(&self, names: &[String]) -> Result<Self> {
        let kept = self
            .entries
            .iter()
            .filter(|s| names.iter().any(|n| n == &s.name))
            .cloned()
            .collect();
        Self::new(self.task, kept)
    }
}

const SEED: u64 = 42;

fn boosting(n_rounds: usize, learning_rate: f64, l2_leaf: f64, subsample: f64, bins: Option<usize>) -> BoostingParams {
    BoostingParams {
        n_rounds,
        learning_rate,
        max_depth: 3,
        min_samples_leaf: 5,
        l2_leaf,
        subsample,
        bins,
        seed: SEED,
    }
}

/// The eight-candidate slate for `task`.
pub fn default_catalog(task: Task) -> CandidateCatalog {
    let classification = task == Task::Classification;
    let forest = ForestParams {
        n_trees: 60,
        max_depth: 10,
        min_samples_leaf: 2,
        max_features: if classification {
            FeatureSubset::Sqrt
        } else {
            FeatureSubset::Third
        },
        seed: SEED,
    };
    let (linear_name, linear) = if classification {
        (
            "logistic_regression",
            Algorithm::LogisticRegression(LinearParams {
                alpha: 1.0,
                max_iter: 1000,
                learning_rate: 0.1,
            }),
        )
    } else {
        (
            "ridge",
            Algorithm::Ridge(LinearParams {
                alpha: 1.0,
                max_iter: 0,
                learning_rate: 0.0,
            }),
        )
    };
    let (svm_name, svm) = if classification {
        (
            "linear_svm",
            Algorithm::LinearSvm(SvmParams {
                c: 1.0,
                epochs: 40,
                epsilon: 0.0,
                seed: SEED,
            }),
        )
    } else {
        (
            "linear_svr",
            Algorithm::LinearSvr(SvmParams {
                c: 1.0,
                epochs: 40,
                epsilon: 0.1,
                seed: SEED,
            }),
        )
    };
    let ada = AdaBoostParams {
        n_rounds: 50,
        learning_rate: if classification { 0.5 } else { 0.1 },
        max_depth: if classification { 1 } else { 3 },
        seed: SEED,
    };

    let entries = vec![
        CandidateSpec::new("random_forest", task, Algorithm::RandomForest(forest)),
        CandidateSpec::new(
            "regularized_boosting",
            task,
            Algorithm::RegularizedBoosting(boosting(80, 0.1, 1.0, 0.8, None)),
        ),
        CandidateSpec::new(
            "histogram_boosting",
            task,
            Algorithm::HistogramBoosting(boosting(80, 0.1, 0.0, 1.0, Some(32))),
        ),
        CandidateSpec::new(
            "gradient_boosting",
            task,
            Algorithm::GradientBoosting(boosting(80, 0.1, 0.0, 1.0, None)),
        ),
        CandidateSpec::new(linear_name, task, linear),
        CandidateSpec::new(svm_name, task, svm),
        CandidateSpec::new(
            "k_neighbors",
            task,
            Algorithm::KNeighbors(KnnParams { k: 7, weighted: true }),
        ),
        CandidateSpec::new("ada_boost", task, Algorithm::AdaBoost(ada)),
    ];
    CandidateCatalog { task, entries }
}

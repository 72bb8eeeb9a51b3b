//! Shared fixtures for unit tests.

use crate::catalog::default_catalog;
use crate::config::{DriftConfig, IoConfig};
use crate::domain::{ExperimentRun, FeatureMatrix, SelectionResult, Split, Task};
use crate::drift::ReferenceDistribution;
use crate::selector::select_top;
use crate::split::train_validation_split;
use crate::synthetic::migraine_dataset;
use crate::trainer::ModelTrainer;

pub(crate) fn fast_io() -> IoConfig {
    IoConfig {
        timeout_ms: 5_000,
        retry_backoff_ms: 1,
    }
}

/// Synthetic rows with an 80/20 split assigned.
pub(crate) fn split_dataset(rows: usize, seed: u64) -> FeatureMatrix {
    let data = migraine_dataset(rows, seed).unwrap();
    train_validation_split(&data, 0.2, seed, true).unwrap()
}

/// Runs of the two cheapest candidates for `task`.
pub(crate) async fn quick_runs(task: Task, matrix: &FeatureMatrix) -> Vec<ExperimentRun> {
    let (linear, data) = match task {
        Task::Classification => ("logistic_regression", matrix.clone()),
        Task::Regression => ("ridge", matrix.occurrence_subset().unwrap()),
    };
    let catalog = default_catalog(task)
        .restrict(&[linear.to_string(), "k_neighbors".to_string()])
        .unwrap();
    ModelTrainer::default()
        .train_all(task, &data, &catalog)
        .await
        .unwrap()
}

/// Top-2 selection and train-partition reference for `task`.
pub(crate) async fn quick_selection(
    task: Task,
    matrix: &FeatureMatrix,
) -> (SelectionResult, ReferenceDistribution) {
    let runs = quick_runs(task, matrix).await;
    let selection = select_top(task, &runs, 2).unwrap();
    let train = match task {
        Task::Classification => matrix.partition(Split::Train),
        Task::Regression => matrix.occurrence_subset().unwrap().partition(Split::Train),
    };
    let reference =
        ReferenceDistribution::capture(task, &train, &DriftConfig::default(), None).unwrap();
    (selection, reference)
}

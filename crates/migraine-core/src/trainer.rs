//! Model trainer: fits every catalog candidate on the train split, scores
//! both splits, diagnoses the gap and emits one run per candidate.
//!
//! Candidates fit on the blocking pool behind a semaphore. A failing (or
//! panicking) fit becomes a `failed` run and the remaining candidates carry
//! on. Results come back in catalog order regardless of completion order.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::catalog::CandidateCatalog;
use crate::config::{DiagnosticsConfig, TrainingConfig};
use crate::diagnostics;
use crate::domain::{
    CandidateSpec, CvScore, ExperimentRun, FeatureMatrix, PipelineError, Result, Split, Task,
};
use crate::metrics::METRICS;
use crate::models::{Algorithm, TrainedModel};
use crate::obs;
use crate::scoring;
use crate::split::kfold_assignments;
use crate::stats;

/// Read-only inputs shared by every concurrent fit.
struct TrainingData {
    task: Task,
    feature_names: Vec<String>,
    x_train: Vec<Vec<f64>>,
    y_train: Vec<f64>,
    x_val: Vec<Vec<f64>>,
    y_val: Vec<f64>,
}

impl TrainingData {
    fn prepare(task: Task, matrix: &FeatureMatrix) -> Result<Self> {
        matrix.validate()?;
        if matrix.target.is_none() {
            return Err(PipelineError::InvalidInput(
                "training matrix has no target column".to_string(),
            ));
        }
        if matrix.split.is_none() {
            return Err(PipelineError::InvalidInput(
                "training matrix has no split assignment".to_string(),
            ));
        }

        let train = matrix.partition(Split::Train);
        let val = matrix.partition(Split::Validation);
        let y_train = train.target.clone().unwrap_or_default();
        let y_val = val.target.clone().unwrap_or_default();
        if y_train.is_empty() || y_val.is_empty() {
            return Err(PipelineError::InvalidInput(format!(
                "{task} needs non-empty train and validation splits ({} / {} rows)",
                y_train.len(),
                y_val.len()
            )));
        }
        if task == Task::Classification
            && y_train.iter().chain(&y_val).any(|v| *v != 0.0 && *v != 1.0)
        {
            return Err(PipelineError::InvalidInput(
                "classification target must be 0/1".to_string(),
            ));
        }

        Ok(Self {
            task,
            feature_names: matrix.feature_names(),
            x_train: train.rows(),
            y_train,
            x_val: val.rows(),
            y_val,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelTrainer {
    training: TrainingConfig,
    diagnostics: DiagnosticsConfig,
}

impl ModelTrainer {
    pub fn new(training: TrainingConfig, diagnostics: DiagnosticsConfig) -> Self {
        Self {
            training,
            diagnostics,
        }
    }

    /// One run per catalog entry, in catalog order.
    ///
    /// Returns `InvalidInput` for a malformed matrix or a catalog built for a
    /// different task; individual candidate failures never error here.
    pub async fn train_all(
        &self,
        task: Task,
        matrix: &FeatureMatrix,
        catalog: &CandidateCatalog,
    ) -> Result<Vec<ExperimentRun>> {
        if catalog.task() != task {
            return Err(PipelineError::InvalidInput(format!(
                "catalog is for {}, asked to train {task}",
                catalog.task()
            )));
        }
        let data = Arc::new(TrainingData::prepare(task, matrix)?);
        obs::emit_training_started(task.as_str(), catalog.len(), matrix.n_rows());

        let permits = Arc::new(Semaphore::new(self.training.concurrency()));
        let mut handles = Vec::with_capacity(catalog.len());
        for (index, spec) in catalog.entries().iter().cloned().enumerate() {
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| PipelineError::CandidateTraining {
                    candidate: spec.name.clone(),
                    reason: e.to_string(),
                })?;
            let data = data.clone();
            let training = self.training.clone();
            let diag = self.diagnostics.clone();
            let fit_spec = spec.clone();
            let handle = tokio::task::spawn_blocking(move || {
                let run = fit_candidate(&data, fit_spec, index, &training, &diag);
                drop(permit);
                run
            });
            handles.push((index, spec, handle));
        }

        let joined = join_all(handles.into_iter().map(|(index, spec, handle)| async move {
            match handle.await {
                Ok(run) => run,
                Err(join) => ExperimentRun::failed(spec, index, format!("fit aborted: {join}")),
            }
        }))
        .await;

        for run in &joined {
            match &run.failure {
                Some(reason) => {
                    obs::emit_candidate_failed(task.as_str(), run.candidate(), reason);
                    METRICS.inc_candidates_failed();
                }
                None => {
                    obs::emit_candidate_finished(
                        task.as_str(),
                        run.candidate(),
                        run.verdict().as_str(),
                        run.validation_primary().unwrap_or(f64::NAN),
                        run.duration_ms,
                    );
                    METRICS.inc_candidates_trained();
                }
            }
        }
        Ok(joined)
    }
}

fn fit_candidate(
    data: &TrainingData,
    spec: CandidateSpec,
    catalog_index: usize,
    training: &TrainingConfig,
    diag: &DiagnosticsConfig,
) -> ExperimentRun {
    let started = Instant::now();
    match evaluate(data, &spec, catalog_index, training, diag) {
        Ok(mut run) => {
            run.duration_ms = started.elapsed().as_millis() as u64;
            run
        }
        Err(e) => {
            let reason = match e {
                PipelineError::CandidateTraining { reason, .. } => reason,
                other => other.to_string(),
            };
            let mut run = ExperimentRun::failed(spec, catalog_index, reason);
            run.duration_ms = started.elapsed().as_millis() as u64;
            run
        }
    }
}

fn evaluate(
    data: &TrainingData,
    spec: &CandidateSpec,
    catalog_index: usize,
    training: &TrainingConfig,
    diag: &DiagnosticsConfig,
) -> Result<ExperimentRun> {
    let task = data.task;
    let fitted = spec
        .algorithm
        .fit(task, &data.x_train, &data.y_train)
        .map_err(|e| PipelineError::CandidateTraining {
            candidate: spec.name.clone(),
            reason: e.to_string(),
        })?;
    let fitted_at = Utc::now();

    let score = |split: Split, x: &[Vec<f64>], y: &[f64]| {
        let pred: Vec<f64> = x.iter().map(|r| fitted.predict_row(r)).collect();
        let prob: Option<Vec<f64>> = x.iter().map(|r| fitted.predict_proba_row(r)).collect();
        scoring::compute_metrics(task, split, y, &pred, prob.as_deref())
    };
    let train_metrics = score(Split::Train, &data.x_train, &data.y_train)?;
    let validation_metrics = score(Split::Validation, &data.x_val, &data.y_val)?;
    let diagnosis =
        diagnostics::diagnose(&train_metrics, &validation_metrics, task.primary_metric(), diag)?;

    let cv = match cross_validate(
        &spec.algorithm,
        task,
        &data.x_train,
        &data.y_train,
        training.cv_folds,
        training.seed,
    ) {
        Ok(cv) => cv,
        Err(e) => {
            tracing::warn!(candidate = %spec.name, error = %e, "cross-validation skipped");
            None
        }
    };

    let validation_primary = validation_metrics.get(task.primary_metric());
    let model = TrainedModel {
        candidate: spec.name.clone(),
        task,
        algorithm: spec.algorithm.clone(),
        feature_names: data.feature_names.clone(),
        fitted_at,
        validation_primary,
        model: fitted,
    };

    Ok(ExperimentRun {
        run_id: None,
        spec: spec.clone(),
        catalog_index,
        train_metrics: Some(train_metrics),
        validation_metrics: Some(validation_metrics),
        diagnosis,
        cv,
        failure: None,
        fitted_at,
        duration_ms: 0,
        model: Some(Arc::new(model)),
    })
}

/// k-fold primary metric of `algorithm` on `(x, y)`, stratified for
/// classification. `folds == 0` disables it and yields `None`.
pub fn cross_validate(
    algorithm: &Algorithm,
    task: Task,
    x: &[Vec<f64>],
    y: &[f64],
    folds: usize,
    seed: u64,
) -> Result<Option<CvScore>> {
    if folds == 0 {
        return Ok(None);
    }
    let labels = (task == Task::Classification).then_some(y);
    let assignment = kfold_assignments(x.len(), labels, folds, seed)?;

    let mut scores = Vec::with_capacity(folds);
    for fold in 0..folds {
        let (mut x_fit, mut y_fit, mut x_out, mut y_out) = (Vec::new(), Vec::new(), Vec::new(), Vec::new());
        for (i, f) in assignment.iter().enumerate() {
            if *f == fold {
                x_out.push(x[i].clone());
                y_out.push(y[i]);
            } else {
                x_fit.push(x[i].clone());
                y_fit.push(y[i]);
            }
        }
        let fitted = algorithm
            .fit(task, &x_fit, &y_fit)
            .map_err(|e| PipelineError::CandidateTraining {
                candidate: algorithm.family().to_string(),
                reason: format!("fold {fold}: {e}"),
            })?;
        let pred: Vec<f64> = x_out.iter().map(|r| fitted.predict_row(r)).collect();
        let snapshot = scoring::compute_metrics(task, Split::Validation, &y_out, &pred, None)?;
        let value = snapshot.get(task.primary_metric()).ok_or_else(|| {
            PipelineError::InvalidInput(format!("fold {fold} produced no {}", task.primary_metric()))
        })?;
        scores.push(value);
    }

    Ok(Some(CvScore {
        folds,
        mean: stats::mean(&scores),
        std: stats::std_dev(&scores),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_catalog;
    use crate::domain::{DiagnosticVerdict, FeatureColumn};
    use crate::models::{KnnParams, LinearParams};
    use tracing_test::traced_test;

    fn separable(n: usize) -> FeatureMatrix {
        let a: Vec<f64> = (0..n).map(|i| (i % 17) as f64).collect();
        let b: Vec<f64> = (0..n).map(|i| ((i * 7) % 11) as f64).collect();
        let y: Vec<f64> = a.iter().map(|v| if *v >= 8.0 { 1.0 } else { 0.0 }).collect();
        let split = (0..n)
            .map(|i| if i % 5 == 0 { Split::Validation } else { Split::Train })
            .collect();
        FeatureMatrix::new(
            vec![FeatureColumn::new("a", a), FeatureColumn::new("b", b)],
            Some(y),
        )
        .unwrap()
        .with_split(split)
        .unwrap()
    }

    fn trainer() -> ModelTrainer {
        ModelTrainer::new(TrainingConfig::default(), DiagnosticsConfig::default())
    }

    #[tokio::test]
    async fn runs_come_back_in_catalog_order() {
        let catalog = default_catalog(Task::Classification)
            .restrict(&[
                "random_forest".to_string(),
                "logistic_regression".to_string(),
                "k_neighbors".to_string(),
            ])
            .unwrap();
        let runs = trainer()
            .train_all(Task::Classification, &separable(200), &catalog)
            .await
            .unwrap();

        let names: Vec<&str> = runs.iter().map(|r| r.candidate()).collect();
        assert_eq!(names, ["random_forest", "logistic_regression", "k_neighbors"]);
        for (i, run) in runs.iter().enumerate() {
            assert_eq!(run.catalog_index, i);
            assert!(!run.is_failed(), "{} failed: {:?}", run.candidate(), run.failure);
            assert!(run.model.is_some());
            assert_eq!(run.train_metrics.as_ref().unwrap().split, Split::Train);
            let acc = run.validation_primary().unwrap();
            assert!((0.0..=1.0).contains(&acc));
            assert_eq!(run.cv.as_ref().unwrap().folds, 3);
        }
        assert!(runs[0].validation_primary().unwrap() > 0.9);
    }

    #[tokio::test]
    #[traced_test]
    async fn singular_candidate_fails_alone() {
        let n = 120;
        let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 1.0).collect();
        let split = (0..n)
            .map(|i| if i % 4 == 0 { Split::Validation } else { Split::Train })
            .collect();
        let matrix = FeatureMatrix::new(
            vec![
                FeatureColumn::new("x", x.clone()),
                FeatureColumn::new("x_copy", x),
            ],
            Some(y),
        )
        .unwrap()
        .with_split(split)
        .unwrap();

        let catalog = CandidateCatalog::new(
            Task::Regression,
            vec![
                CandidateSpec::new(
                    "ridge_unpenalized",
                    Task::Regression,
                    Algorithm::Ridge(LinearParams {
                        alpha: 0.0,
                        max_iter: 0,
                        learning_rate: 0.0,
                    }),
                ),
                CandidateSpec::new(
                    "k_neighbors",
                    Task::Regression,
                    Algorithm::KNeighbors(KnnParams { k: 3, weighted: true }),
                ),
            ],
        )
        .unwrap();

        let runs = trainer().train_all(Task::Regression, &matrix, &catalog).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].verdict(), DiagnosticVerdict::Failed);
        assert!(runs[0].failure.as_deref().unwrap().contains("singular"));
        assert!(runs[0].validation_metrics.is_none());
        assert!(runs[0].model.is_none());
        assert!(!runs[1].is_failed());
        assert!(logs_contain("candidate.failed"));
    }

    #[tokio::test]
    async fn missing_split_is_invalid_input() {
        let mut m = separable(50);
        m.split = None;
        let err = trainer()
            .train_all(Task::Classification, &m, &default_catalog(Task::Classification))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn catalog_for_other_task_is_rejected() {
        let err = trainer()
            .train_all(Task::Classification, &separable(50), &default_catalog(Task::Regression))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn cross_validation_scores_every_fold() {
        let m = separable(90);
        let x = m.rows();
        let y = m.target.clone().unwrap();
        let algo = Algorithm::KNeighbors(KnnParams { k: 3, weighted: false });
        let cv = cross_validate(&algo, Task::Classification, &x, &y, 3, 42)
            .unwrap()
            .unwrap();
        assert_eq!(cv.folds, 3);
        assert!((0.0..=1.0).contains(&cv.mean));
        assert!(cv.std >= 0.0);

        assert!(cross_validate(&algo, Task::Classification, &x, &y, 0, 42)
            .unwrap()
            .is_none());
    }
}

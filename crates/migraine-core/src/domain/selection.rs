//! Selection result and the persisted per-model metadata record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::candidate::Task;
use super::run::{ConfusionMatrix, CvScore, Diagnosis, ExperimentRun};
use crate::models::Algorithm;

/// A candidate excluded from ranking because its fit failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedCandidate {
    pub candidate: String,
    pub reason: String,
}

/// Top-k runs for one task, best first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionResult {
    pub task: Task,
    pub primary_metric: String,
    /// Number of runs considered, failed ones included
    pub evaluated: usize,
    pub ranked: Vec<ExperimentRun>,
    #[serde(default)]
    pub failed: Vec<FailedCandidate>,
}

impl SelectionResult {
    pub fn top(&self) -> Option<&ExperimentRun> {
        self.ranked.first()
    }

    /// Metadata record for the model at `rank` (1-based).
    pub fn metadata(&self, rank: usize) -> Option<ModelMetadata> {
        rank.checked_sub(1)
            .and_then(|i| self.ranked.get(i))
            .map(|run| ModelMetadata::from_run(run, rank))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataMetrics {
    pub train: BTreeMap<String, f64>,
    pub validation: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cv: Option<CvScore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_confusion: Option<ConfusionMatrix>,
}

/// `<rank>.meta.json`: everything the serving layer needs besides the model.
///
/// Derived only from the run, so the same selection always serializes to the
/// same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub feature_names: Vec<String>,
    pub metrics: MetadataMetrics,
    pub training_timestamp: DateTime<Utc>,
    pub model_rank: usize,
    pub task: Task,
    pub candidate: String,
    pub params: Algorithm,
    pub diagnosis: Diagnosis,
}

impl ModelMetadata {
    pub fn from_run(run: &ExperimentRun, rank: usize) -> Self {
        let values = |m: &Option<super::run::MetricSnapshot>| {
            m.as_ref().map(|s| s.values.clone()).unwrap_or_default()
        };
        Self {
            feature_names: run
                .model
                .as_ref()
                .map(|m| m.feature_names.clone())
                .unwrap_or_default(),
            metrics: MetadataMetrics {
                train: values(&run.train_metrics),
                validation: values(&run.validation_metrics),
                cv: run.cv.clone(),
                validation_confusion: run.validation_metrics.as_ref().and_then(|s| s.confusion),
            },
            training_timestamp: run.fitted_at,
            model_rank: rank,
            task: run.spec.task,
            candidate: run.spec.name.clone(),
            params: run.spec.algorithm.clone(),
            diagnosis: run.diagnosis.clone(),
        }
    }
}

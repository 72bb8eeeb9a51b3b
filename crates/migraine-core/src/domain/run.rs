//! Per-candidate results: metric snapshots, diagnosis and the experiment run.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use experiment_ledger::RunId;
use serde::{Deserialize, Serialize};

use super::candidate::{CandidateSpec, Task};
use super::matrix::Split;
use crate::models::TrainedModel;

/// Metric name to value, tagged with the split it was computed on.
///
/// Undefined metrics (ROC-AUC with a single class present) are absent from
/// `values`, never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub split: Split,
    pub values: BTreeMap<String, f64>,
    /// Classification only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confusion: Option<ConfusionMatrix>,
}

impl MetricSnapshot {
    pub fn new(split: Split, values: BTreeMap<String, f64>) -> Self {
        Self {
            split,
            values,
            confusion: None,
        }
    }

    pub fn with_confusion(mut self, confusion: ConfusionMatrix) -> Self {
        self.confusion = Some(confusion);
        self
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).copied()
    }
}

/// Binary confusion counts with label 1 as the positive class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
}

impl ConfusionMatrix {
    /// Count `(y_true, y_pred)` pairs; labels are already known to be 0/1.
    pub fn from_labels(y_true: &[f64], y_pred: &[f64]) -> Self {
        let mut m = Self::default();
        for (t, p) in y_true.iter().zip(y_pred) {
            match (*t == 1.0, *p == 1.0) {
                (true, true) => m.tp += 1,
                (false, true) => m.fp += 1,
                (false, false) => m.tn += 1,
                (true, false) => m.fn_ += 1,
            }
        }
        m
    }

    pub fn total(&self) -> usize {
        self.tp + self.fp + self.tn + self.fn_
    }

    /// Per-class precision, recall, F1 and support, label 0 first.
    /// Zero denominators give 0.
    pub fn class_report(&self) -> [ClassReport; 2] {
        [
            ClassReport::from_counts(0, self.tn, self.fn_, self.fp),
            ClassReport::from_counts(1, self.tp, self.fp, self.fn_),
        ]
    }
}

/// One row of a per-class classification report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    pub label: u8,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

impl ClassReport {
    fn from_counts(label: u8, hits: usize, false_alarms: usize, misses: usize) -> Self {
        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let precision = ratio(hits, hits + false_alarms);
        let recall = ratio(hits, hits + misses);
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };
        Self {
            label,
            precision,
            recall,
            f1,
            support: hits + misses,
        }
    }
}

/// Generalization verdict. `Failed` marks a candidate whose fit raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticVerdict {
    Overfit,
    Underfit,
    WellFit,
    Failed,
}

impl DiagnosticVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticVerdict::Overfit => "overfit",
            DiagnosticVerdict::Underfit => "underfit",
            DiagnosticVerdict::WellFit => "well_fit",
            DiagnosticVerdict::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DiagnosticVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    None,
    Medium,
    High,
}

/// Verdict plus the evidence behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub verdict: DiagnosticVerdict,
    /// train primary - validation primary; absent for failed runs
    pub gap: Option<f64>,
    pub severity: Severity,
    pub recommendation: String,
}

/// k-fold cross-validated primary metric on the training split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvScore {
    pub folds: usize,
    pub mean: f64,
    pub std: f64,
}

/// One candidate's outcome within a training session.
///
/// The fitted model is held by reference and never serialized with the run;
/// the recorder stores it as a separate blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentRun {
    /// Assigned by the experiment recorder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    pub spec: CandidateSpec,
    /// Position of the candidate in its catalog; breaks ranking ties
    pub catalog_index: usize,
    pub train_metrics: Option<MetricSnapshot>,
    pub validation_metrics: Option<MetricSnapshot>,
    pub diagnosis: Diagnosis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cv: Option<CvScore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub fitted_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip)]
    pub model: Option<Arc<TrainedModel>>,
}

impl ExperimentRun {
    /// A run whose fit (or scoring) raised: verdict `failed`, metrics absent.
    pub fn failed(spec: CandidateSpec, catalog_index: usize, reason: impl Into<String>) -> Self {
        Self {
            run_id: None,
            spec,
            catalog_index,
            train_metrics: None,
            validation_metrics: None,
            diagnosis: Diagnosis {
                verdict: DiagnosticVerdict::Failed,
                gap: None,
                severity: Severity::High,
                recommendation: crate::diagnostics::recommendation(DiagnosticVerdict::Failed)
                    .to_string(),
            },
            cv: None,
            failure: Some(reason.into()),
            fitted_at: Utc::now(),
            duration_ms: 0,
            model: None,
        }
    }

    pub fn task(&self) -> Task {
        self.spec.task
    }

    pub fn candidate(&self) -> &str {
        &self.spec.name
    }

    pub fn verdict(&self) -> DiagnosticVerdict {
        self.diagnosis.verdict
    }

    pub fn is_failed(&self) -> bool {
        self.diagnosis.verdict == DiagnosticVerdict::Failed
    }

    /// Validation value of the task's primary metric.
    pub fn validation_primary(&self) -> Option<f64> {
        self.validation_metrics
            .as_ref()
            .and_then(|m| m.get(self.spec.task.primary_metric()))
    }

    pub fn train_primary(&self) -> Option<f64> {
        self.train_metrics
            .as_ref()
            .and_then(|m| m.get(self.spec.task.primary_metric()))
    }
}

//! Migraine Core Library
//!
//! Training, evaluation and drift monitoring for the migraine occurrence
//! (classification) and severity (regression) models.
//!
//! ## Flow
//!
//! - [`trainer::ModelTrainer`] fits every catalog candidate, scores both
//!   splits and diagnoses the generalization gap
//! - [`recording::ExperimentRecorder`] appends each run to the experiment ledger
//! - [`selector::select_and_publish`] ranks runs and atomically publishes the
//!   top-k with their drift reference through [`artifacts::ArtifactStore`]
//! - [`monitor::DriftMonitor`] checks the rolling prediction window against
//!   the published reference and emits retrain signals
//! - [`reporting::ReportGenerator`] renders the evaluation report

pub mod artifacts;
pub mod catalog;
pub mod config;
pub mod diagnostics;
pub mod domain;
pub mod drift;
pub mod io;
pub mod metrics;
pub mod models;
pub mod monitor;
pub mod obs;
pub mod pipeline;
pub mod recording;
pub mod reporting;
pub mod scoring;
pub mod selector;
pub mod serving;
pub mod split;
pub mod stats;
pub mod synthetic;
pub mod telemetry;
pub mod trainer;

#[cfg(test)]
mod test_support;

pub use artifacts::{ArtifactStore, Release};
pub use catalog::{default_catalog, CandidateCatalog};
pub use config::{DiagnosticsConfig, DriftConfig, IoConfig, PathsConfig, PipelineConfig, TrainingConfig};
pub use diagnostics::{classify, diagnose, recommendation};
pub use domain::{
    CandidateSpec, ClassReport, ConfusionMatrix, CvScore, Diagnosis, DiagnosticVerdict, ExperimentRun, FailedCandidate,
    FeatureColumn, FeatureMatrix, FeatureVector, MetricSnapshot, ModelMetadata, PipelineError,
    Result, SelectionResult, Severity, Split, Task,
};
pub use drift::{
    check_drift, ks_two_sample, population_stability_index, DriftReport, FeatureDrift, KsResult,
    Outcomes, PsiStatus, ReferenceDistribution,
};
pub use metrics::METRICS;
pub use models::{Algorithm, FittedModel, Prediction, TrainedModel};
pub use monitor::{
    DriftHistory, DriftMonitor, FileWindowSource, HistoryEntry, PredictionWindow, RetrainSignal,
    SharedWindow, WindowRecord, WindowSource,
};
pub use pipeline::{PipelineSummary, TaskOutcome, TaskSummary, TrainingPipeline};
pub use recording::ExperimentRecorder;
pub use reporting::{EvaluationReport, ReportGenerator, ReportPaths, TrainingFailureReport};
pub use scoring::{compute_classification_metrics, compute_metrics, compute_regression_metrics, primary_metric};
pub use selector::{select_and_publish, select_top};
pub use serving::{MigrainePredictor, RankedPrediction};
pub use trainer::ModelTrainer;

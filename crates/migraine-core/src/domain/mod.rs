//! Domain model for the migraine modelling pipeline.

pub mod candidate;
pub mod error;
pub mod matrix;
pub mod run;
pub mod selection;

pub use candidate::{CandidateSpec, Task};
pub use error::{PipelineError, Result};
pub use matrix::{FeatureColumn, FeatureMatrix, FeatureVector, Split};
pub use run::{
    ClassReport, ConfusionMatrix, CvScore, Diagnosis, DiagnosticVerdict, ExperimentRun,
    MetricSnapshot, Severity,
};
pub use selection::{FailedCandidate, MetadataMetrics, ModelMetadata, SelectionResult};

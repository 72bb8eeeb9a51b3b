//! Error taxonomy for the training, evaluation and drift pipeline.

use experiment_ledger::LedgerError;

/// Pipeline errors.
///
/// `CandidateTraining` is isolated per candidate and recorded as a failed run;
/// `DriftComputation` skips one monitoring cycle. Everything else propagates.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("candidate {candidate} failed to train: {reason}")]
    CandidateTraining { candidate: String, reason: String },

    #[error("no viable candidate for {task}: {viable} viable, {required} required")]
    NoViableCandidate {
        task: String,
        viable: usize,
        required: usize,
    },

    #[error("feature mismatch: expected {expected:?}, got {actual:?}")]
    FeatureMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("drift computation failed: {0}")]
    DriftComputation(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{op} timed out after {timeout_ms} ms")]
    Timeout { op: String, timeout_ms: u64 },

    #[error("config error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Process exit code for binaries surfacing this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::InvalidInput(_) => 2,
            PipelineError::NoViableCandidate { .. } => 3,
            PipelineError::FeatureMismatch { .. } => 4,
            _ => 1,
        }
    }

    /// Whether one retry of the same disk operation could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Timeout { .. } => true,
            PipelineError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            PipelineError::Ledger(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

//! Tasks and candidate specifications.

use serde::{Deserialize, Serialize};

use crate::models::Algorithm;

/// The two prediction tasks trained per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    /// Binary migraine occurrence.
    Classification,
    /// Continuous severity, trained on occurrence = 1 rows.
    Regression,
}

impl Task {
    pub const ALL: [Task; 2] = [Task::Classification, Task::Regression];

    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Classification => "classification",
            Task::Regression => "regression",
        }
    }

    /// Metric used to rank candidates and classify fit quality.
    pub fn primary_metric(&self) -> &'static str {
        match self {
            Task::Classification => "accuracy",
            Task::Regression => "r2",
        }
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Task {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "classification" => Ok(Task::Classification),
            "regression" => Ok(Task::Regression),
            other => Err(format!("unknown task: {other}")),
        }
    }
}

/// One entry of the candidate catalog: an algorithm with fixed
/// hyperparameters bound to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSpec {
    /// Unique within its catalog
    pub name: String,
    pub task: Task,
    pub algorithm: Algorithm,
}

impl CandidateSpec {
    pub fn new(name: impl Into<String>, task: Task, algorithm: Algorithm) -> Self {
        Self {
            name: name.into(),
            task,
            algorithm,
        }
    }
}

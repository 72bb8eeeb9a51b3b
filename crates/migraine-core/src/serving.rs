//! Serving contract over the published occurrence and severity models.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::artifacts::ArtifactStore;
use crate::domain::{FeatureVector, PipelineError, Result, Task};
use crate::metrics::METRICS;
use crate::models::TrainedModel;

/// Prediction of one rank pair (occurrence model n, severity model n).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPrediction {
    pub rank: usize,
    pub occurrence_model: String,
    pub severity_model: String,
    /// 1 when an episode is predicted
    pub occurrence: u8,
    /// Probability of an episode
    pub probability: f64,
    /// In [1, 10] with one decimal when an episode is predicted, else 0
    pub severity: f64,
}

pub struct MigrainePredictor {
    occurrence: Vec<Arc<TrainedModel>>,
    severity: Vec<Arc<TrainedModel>>,
}

impl MigrainePredictor {
    pub fn from_models(occurrence: Vec<Arc<TrainedModel>>, severity: Vec<Arc<TrainedModel>>) -> Result<Self> {
        if occurrence.is_empty() || severity.is_empty() {
            return Err(PipelineError::InvalidInput(
                "predictor needs at least one occurrence and one severity model".to_string(),
            ));
        }
        Ok(Self {
            occurrence,
            severity,
        })
    }

    /// Load the current release of both tasks.
    pub async fn load(store: &ArtifactStore) -> Result<Self> {
        let mut models = Vec::with_capacity(2);
        for task in Task::ALL {
            let release = store.current_release(task).await?.ok_or_else(|| {
                PipelineError::InvalidInput(format!("no published {task} models"))
            })?;
            let selection = store.load_selection(&release).await?;
            models.push(
                selection
                    .ranked
                    .into_iter()
                    .filter_map(|run| run.model)
                    .collect::<Vec<_>>(),
            );
        }
        let severity = models.pop().unwrap_or_default();
        let occurrence = models.pop().unwrap_or_default();
        Self::from_models(occurrence, severity)
    }

    pub fn feature_names(&self) -> &[String] {
        self.occurrence
            .first()
            .map(|m| m.feature_names.as_slice())
            .unwrap_or_default()
    }

    /// One prediction per occurrence rank. The input must match the models'
    /// feature order exactly.
    pub fn predict(&self, input: &FeatureVector) -> Result<Vec<RankedPrediction>> {
        let mut out = Vec::with_capacity(self.occurrence.len());
        for (i, occurrence_model) in self.occurrence.iter().enumerate() {
            let severity_model = self
                .severity
                .get(i)
                .or_else(|| self.severity.last())
                .ok_or_else(|| PipelineError::InvalidInput("no severity model loaded".to_string()))?;

            let occurrence = occurrence_model.predict(input)?;
            let probability = occurrence_model
                .model
                .predict_proba_row(&input.values)
                .unwrap_or(if occurrence.value == 1.0 {
                    occurrence.confidence
                } else {
                    1.0 - occurrence.confidence
                });
            let severity = if occurrence.value == 1.0 {
                let raw = severity_model.predict(input)?.value.clamp(1.0, 10.0);
                (raw * 10.0).round() / 10.0
            } else {
                0.0
            };
            out.push(RankedPrediction {
                rank: i + 1,
                occurrence_model: occurrence_model.candidate.clone(),
                severity_model: severity_model.candidate.clone(),
                occurrence: u8::from(occurrence.value == 1.0),
                probability,
                severity,
            });
        }
        METRICS.inc_predictions_served();
        Ok(out)
    }
}

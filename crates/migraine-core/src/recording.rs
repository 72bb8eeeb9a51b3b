//! Experiment recorder: bridges [`ExperimentRun`]s to the ledger.
//!
//! Each run becomes one ledger entry whose payload is the serialized run.
//! The fitted model is stored separately as a content-addressed blob and
//! linked from the entry by digest.

use std::sync::Arc;

use experiment_ledger::{
    BlobStore, ExperimentEntry, ExperimentLedger, ExperimentRecord, RecordStatus, RunFilter, RunId,
    SessionId, SessionRecord,
};
use futures::future::join_all;

use crate::config::IoConfig;
use crate::domain::{ExperimentRun, PipelineError, Result, Task};
use crate::io::retry_async;
use crate::models::TrainedModel;

/// Usage:
/// 1. [`ExperimentRecorder::open_session`] once per training invocation.
/// 2. [`ExperimentRecorder::record`] (or `record_all`) for each run.
/// 3. [`ExperimentRecorder::close_session`] to flush and seal the session.
#[derive(Clone)]
pub struct ExperimentRecorder {
    ledger: Arc<dyn ExperimentLedger>,
    blobs: Arc<dyn BlobStore>,
    io: IoConfig,
}

impl ExperimentRecorder {
    pub fn new(ledger: Arc<dyn ExperimentLedger>, blobs: Arc<dyn BlobStore>, io: IoConfig) -> Self {
        Self { ledger, blobs, io }
    }

    pub async fn open_session(&self, name: &str) -> Result<SessionId> {
        retry_async("ledger.open_session", &self.io, || async move {
            self.ledger.open_session(name).await.map_err(PipelineError::from)
        })
        .await
    }

    /// Append `run` to `session`, storing its model blob first.
    pub async fn record(&self, session: &SessionId, run: &ExperimentRun) -> Result<RunId> {
        let model_digest = match &run.model {
            Some(model) => {
                let bytes = serde_json::to_vec(model.as_ref())?;
                let bytes = &bytes;
                Some(
                    retry_async("blobs.put", &self.io, || async move {
                        self.blobs.put(bytes).await.map_err(PipelineError::from)
                    })
                    .await?,
                )
            }
            None => None,
        };

        let entry = ExperimentEntry {
            task: run.task().as_str().to_string(),
            candidate: run.candidate().to_string(),
            catalog_index: run.catalog_index,
            status: if run.is_failed() {
                RecordStatus::Failed
            } else {
                RecordStatus::Succeeded
            },
            model_digest,
            payload: serde_json::to_value(run)?,
            fitted_at: run.fitted_at,
        };
        let entry = &entry;
        let run_id = retry_async("ledger.record", &self.io, || async move {
            self.ledger
                .record(session, entry.clone())
                .await
                .map_err(PipelineError::from)
        })
        .await?;
        tracing::debug!(run_id = %run_id, candidate = %run.candidate(), "run recorded");
        Ok(run_id)
    }

    /// Record every run concurrently; returns the runs with ids assigned, in
    /// input order.
    pub async fn record_all(&self, session: &SessionId, runs: Vec<ExperimentRun>) -> Result<Vec<ExperimentRun>> {
        let ids = join_all(runs.iter().map(|run| self.record(session, run))).await;
        runs.into_iter()
            .zip(ids)
            .map(|(mut run, id)| -> Result<ExperimentRun> {
                run.run_id = Some(id?);
                Ok(run)
            })
            .collect()
    }

    /// Rebuild runs matching `filter`, with their fitted models attached.
    pub async fn query(&self, filter: &RunFilter) -> Result<Vec<ExperimentRun>> {
        let records = retry_async("ledger.query", &self.io, || async move {
            self.ledger.query(filter).await.map_err(PipelineError::from)
        })
        .await?;

        let mut runs = Vec::with_capacity(records.len());
        for record in records {
            runs.push(self.rebuild(record).await?);
        }
        Ok(runs)
    }

    /// All runs of `task` recorded in `session`, in record order.
    pub async fn session_runs(&self, session: &SessionId, task: Task) -> Result<Vec<ExperimentRun>> {
        self.query(&RunFilter::all().session(session).task(task.as_str()))
            .await
    }

    pub async fn close_session(&self, session: &SessionId) -> Result<SessionRecord> {
        retry_async("ledger.close_session", &self.io, || async move {
            self.ledger.close_session(session).await.map_err(PipelineError::from)
        })
        .await
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        retry_async("ledger.list_sessions", &self.io, || async move {
            self.ledger.list_sessions().await.map_err(PipelineError::from)
        })
        .await
    }

    async fn rebuild(&self, record: ExperimentRecord) -> Result<ExperimentRun> {
        let mut run: ExperimentRun = serde_json::from_value(record.entry.payload)?;
        run.run_id = Some(record.run_id);
        if let Some(digest) = &record.entry.model_digest {
            let bytes = retry_async("blobs.get", &self.io, || async move {
                self.blobs.get(digest).await.map_err(PipelineError::from)
            })
            .await?;
            let model: TrainedModel = serde_json::from_slice(&bytes)?;
            run.model = Some(Arc::new(model));
        }
        Ok(run)
    }
}

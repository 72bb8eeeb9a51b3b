//! End-to-end training invocation for both tasks.
//!
//! One ledger session per invocation. For each task: train the catalog,
//! record every run, capture the drift reference from the train partition,
//! select and publish the top-k. A task without enough viable candidates
//! gets a failure report and keeps its previous release; the other task is
//! unaffected. The evaluation report is written at the end either way.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use experiment_ledger::{FsBlobStore, FsExperimentLedger, SessionId};
use tracing::{warn, Instrument};

use crate::artifacts::ArtifactStore;
use crate::catalog::{default_catalog, CandidateCatalog};
use crate::config::PipelineConfig;
use crate::domain::{FeatureMatrix, PipelineError, Result, SelectionResult, Split, Task};
use crate::drift::ReferenceDistribution;
use crate::metrics::METRICS;
use crate::monitor::{history_dir, DriftHistory, HistoryEntry};
use crate::obs;
use crate::recording::ExperimentRecorder;
use crate::reporting::{write_failure_report, ReportGenerator, ReportPaths, TrainingFailureReport};
use crate::selector::select_and_publish;
use crate::split::train_validation_split;
use crate::trainer::ModelTrainer;

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Published {
        release_id: String,
        top_candidate: String,
        top_score: f64,
    },
    /// Too few viable candidates; the previous release stays current
    Rejected { error: String, report: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskSummary {
    pub task: Task,
    pub evaluated: usize,
    pub failed: usize,
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub session_id: SessionId,
    pub tasks: Vec<TaskSummary>,
    pub report: ReportPaths,
}

impl PipelineSummary {
    pub fn succeeded(&self) -> bool {
        self.tasks
            .iter()
            .all(|t| matches!(t.outcome, TaskOutcome::Published { .. }))
    }

    /// 0 when every task published, otherwise the no-viable-candidate code.
    pub fn exit_code(&self) -> i32 {
        if self.succeeded() {
            0
        } else {
            3
        }
    }
}

pub struct TrainingPipeline {
    config: PipelineConfig,
    trainer: ModelTrainer,
    recorder: ExperimentRecorder,
    store: ArtifactStore,
    catalogs: BTreeMap<Task, CandidateCatalog>,
}

impl TrainingPipeline {
    pub fn new(config: PipelineConfig, recorder: ExperimentRecorder, store: ArtifactStore) -> Self {
        let trainer = ModelTrainer::new(config.training.clone(), config.diagnostics.clone());
        let catalogs = Task::ALL
            .into_iter()
            .map(|task| (task, default_catalog(task)))
            .collect();
        Self {
            config,
            trainer,
            recorder,
            store,
            catalogs,
        }
    }

    /// Filesystem ledger, blob store and artifact store under `config.paths`.
    pub fn open(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let ledger_dir = &config.paths.ledger_dir;
        let recorder = ExperimentRecorder::new(
            Arc::new(FsExperimentLedger::open(ledger_dir)?),
            Arc::new(FsBlobStore::new(ledger_dir)?),
            config.io.clone(),
        );
        let store = ArtifactStore::new(config.paths.artifacts_dir.clone(), config.io.clone());
        Ok(Self::new(config, recorder, store))
    }

    /// Replace the catalog for `catalog.task()`.
    pub fn with_catalog(mut self, catalog: CandidateCatalog) -> Self {
        self.catalogs.insert(catalog.task(), catalog);
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn recorder(&self) -> &ExperimentRecorder {
        &self.recorder
    }

    /// Train, record, select and publish both tasks from `data` (occurrence
    /// target plus severity column). A split is assigned when `data` has none.
    pub async fn run(&self, data: &FeatureMatrix) -> Result<PipelineSummary> {
        data.validate()?;
        if data.target.is_none() || data.severity.is_none() {
            return Err(PipelineError::InvalidInput(
                "training data needs an occurrence target and a severity column".to_string(),
            ));
        }
        let data = match data.split {
            Some(_) => data.clone(),
            None => train_validation_split(
                data,
                self.config.training.validation_fraction,
                self.config.training.seed,
                self.config.training.stratify,
            )?,
        };

        let session = self
            .recorder
            .open_session(&self.config.training.experiment_name)
            .await?;
        let outcome = self
            .run_session(&session, &data)
            .instrument(obs::session_span(&session.0))
            .await;
        match self.recorder.close_session(&session).await {
            Ok(record) => tracing::debug!(session_id = %session, runs = record.run_count, "session closed"),
            Err(e) if outcome.is_err() => {
                warn!(session_id = %session, error = %e, "failed to close session after error")
            }
            Err(e) => return Err(e),
        }
        METRICS.flush();

        let (tasks, report) = outcome?;
        Ok(PipelineSummary {
            session_id: session,
            tasks,
            report,
        })
    }

    async fn run_session(
        &self,
        session: &SessionId,
        data: &FeatureMatrix,
    ) -> Result<(Vec<TaskSummary>, ReportPaths)> {
        let mut summaries = Vec::with_capacity(Task::ALL.len());
        let mut selections: Vec<SelectionResult> = Vec::new();
        for task in Task::ALL {
            let (summary, selection) = self.run_task(session, task, data).await?;
            summaries.push(summary);
            selections.extend(selection);
        }

        let mut history: Vec<HistoryEntry> = Vec::new();
        for task in Task::ALL {
            let log = DriftHistory::new(
                history_dir(&self.config.paths.reports_dir, task),
                self.config.io.clone(),
            );
            history.extend(log.load().await?);
        }
        let report = ReportGenerator::render(&selections, &history);
        let paths =
            ReportGenerator::write_report(&report, &self.config.paths.reports_dir, &self.config.io)
                .await?;
        Ok((summaries, paths))
    }

    async fn run_task(
        &self,
        session: &SessionId,
        task: Task,
        data: &FeatureMatrix,
    ) -> Result<(TaskSummary, Option<SelectionResult>)> {
        let catalog = self.catalogs.get(&task).ok_or_else(|| {
            PipelineError::InvalidInput(format!("no catalog configured for {task}"))
        })?;
        let matrix = match task {
            Task::Classification => data.clone(),
            Task::Regression => data.occurrence_subset()?,
        };

        let runs = self.trainer.train_all(task, &matrix, catalog).await?;
        let runs = self.recorder.record_all(session, runs).await?;
        let failed = runs.iter().filter(|r| r.is_failed()).count();
        let reference = ReferenceDistribution::capture(
            task,
            &matrix.partition(Split::Train),
            &self.config.drift,
            None,
        )?;

        let published = select_and_publish(
            task,
            &runs,
            self.config.training.top_k,
            &self.store,
            &reference,
        )
        .await;
        let (outcome, selection) = match published {
            Ok((selection, release)) => {
                let top = selection.top();
                let outcome = TaskOutcome::Published {
                    release_id: release.release_id,
                    top_candidate: top.map(|r| r.candidate().to_string()).unwrap_or_default(),
                    top_score: top.and_then(|r| r.validation_primary()).unwrap_or(f64::NAN),
                };
                (outcome, Some(selection))
            }
            Err(e @ PipelineError::NoViableCandidate { .. }) => {
                let failure = TrainingFailureReport::new(task, &e, &runs);
                let report =
                    write_failure_report(&failure, &self.config.paths.reports_dir, &self.config.io)
                        .await?;
                let outcome = TaskOutcome::Rejected {
                    error: e.to_string(),
                    report,
                };
                (outcome, None)
            }
            Err(e) => return Err(e),
        };

        Ok((
            TaskSummary {
                task,
                evaluated: runs.len(),
                failed,
                outcome,
            },
            selection,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fast_io, split_dataset};
    use experiment_ledger::fakes::{MemoryBlobStore, MemoryExperimentLedger};
    use tracing_test::traced_test;

    fn quick_pipeline(root: &std::path::Path) -> TrainingPipeline {
        let mut config = PipelineConfig::default();
        config.training.cv_folds = 0;
        config.io = fast_io();
        config.paths.artifacts_dir = root.join("artifacts");
        config.paths.reports_dir = root.join("reports");
        let recorder = ExperimentRecorder::new(
            Arc::new(MemoryExperimentLedger::new()),
            Arc::new(MemoryBlobStore::new()),
            fast_io(),
        );
        let store = ArtifactStore::new(config.paths.artifacts_dir.clone(), fast_io());
        let quick = |task: Task, linear: &str| {
            default_catalog(task)
                .restrict(&[linear.to_string(), "k_neighbors".to_string()])
                .unwrap()
        };
        TrainingPipeline::new(config, recorder, store)
            .with_catalog(quick(Task::Classification, "logistic_regression"))
            .with_catalog(quick(Task::Regression, "ridge"))
    }

    #[tokio::test]
    #[traced_test]
    async fn publishes_both_tasks_and_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = quick_pipeline(dir.path());
        let summary = pipeline.run(&split_dataset(300, 61)).await.unwrap();

        assert!(summary.succeeded());
        assert_eq!(summary.exit_code(), 0);
        assert_eq!(summary.tasks.len(), 2);
        for task in &summary.tasks {
            assert_eq!(task.evaluated, 2);
            assert!(pipeline.store().current_release(task.task).await.unwrap().is_some());
        }
        assert!(summary.report.json.exists());
        assert!(summary.report.html.exists());

        let runs = pipeline
            .recorder()
            .session_runs(&summary.session_id, Task::Regression)
            .await
            .unwrap();
        assert_eq!(runs.len(), 2);
        assert!(logs_contain("selection.published"));
        assert!(logs_contain("training.started"));
    }

    #[tokio::test]
    async fn unsplit_input_gets_a_split() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = quick_pipeline(dir.path());
        let data = crate::synthetic::migraine_dataset(300, 62).unwrap();
        assert!(data.split.is_none());
        let summary = pipeline.run(&data).await.unwrap();
        assert!(summary.succeeded());
    }

    #[tokio::test]
    async fn matrix_without_severity_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = quick_pipeline(dir.path());
        let mut data = split_dataset(200, 63);
        data.severity = None;
        let err = pipeline.run(&data).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
        assert_eq!(err.exit_code(), 2);
    }
}

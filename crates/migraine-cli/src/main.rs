//! Migraine pipeline CLI
//!
//! The `migraine` command drives training, drift checks and reporting for the
//! occurrence and severity models.
//!
//! ## Commands
//!
//! - `synth`: Write a synthetic training dataset
//! - `train`: Train both tasks, publish the top-k and write the report
//! - `drift`: Run one drift cycle against an exported prediction window
//! - `report`: Re-render the evaluation report from the published releases
//! - `predict`: Score one feature vector with the published models
//! - `runs`: Inspect the experiment ledger

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use experiment_ledger::{FsBlobStore, FsExperimentLedger, RecordStatus, RunFilter, SessionId};
use migraine_core::monitor::history_dir;
use migraine_core::split::train_validation_split;
use migraine_core::synthetic::migraine_dataset;
use migraine_core::telemetry::{init_tracing, level_from_verbosity};
use migraine_core::{
    ArtifactStore, DriftHistory, DriftMonitor, ExperimentRecorder, FeatureMatrix, FeatureVector,
    FileWindowSource, HistoryEntry, MigrainePredictor, PipelineConfig, PipelineError,
    ReportGenerator, Task, TaskOutcome, TrainingPipeline,
};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "migraine")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Migraine model training, evaluation and drift monitoring", long_about = None)]
struct Cli {
    /// Pipeline configuration file (TOML)
    #[arg(short, long, global = true, env = "MIGRAINE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true, env = "MIGRAINE_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a synthetic dataset as JSON
    Synth {
        /// Number of rows
        #[arg(short, long, default_value = "1000")]
        rows: usize,

        #[arg(short, long, default_value = "42")]
        seed: u64,

        /// Also assign a stratified train/validation split
        #[arg(long)]
        split: bool,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Train every candidate for both tasks and publish the top-k
    Train {
        /// Feature matrix JSON (as written by `synth`)
        #[arg(short, long, conflicts_with = "synthetic")]
        data: Option<PathBuf>,

        /// Generate this many synthetic rows instead of reading a file
        #[arg(long)]
        synthetic: Option<usize>,

        /// Override training.top_k
        #[arg(long)]
        top_k: Option<usize>,

        /// Override training.cv_folds (0 disables cross-validation)
        #[arg(long)]
        cv_folds: Option<usize>,
    },

    /// Run one drift cycle for a task against an exported prediction window
    Drift {
        #[arg(short, long, value_enum)]
        task: TaskArg,

        /// Prediction window JSON exported by the serving layer
        #[arg(short, long, env = "MIGRAINE_WINDOW_FILE")]
        window: PathBuf,
    },

    /// Re-render the evaluation report from the current releases
    Report,

    /// Score one feature vector with the published models
    Predict {
        /// JSON object mapping feature name to value
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Inspect recorded sessions and runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },
}

#[derive(Subcommand)]
enum RunsAction {
    /// List training sessions
    Sessions,

    /// List recorded runs
    List {
        /// Restrict to one session
        #[arg(short, long)]
        session: Option<String>,

        #[arg(short, long, value_enum)]
        task: Option<TaskArg>,

        /// Only runs whose fit failed
        #[arg(long)]
        failed: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TaskArg {
    Classification,
    Regression,
}

impl From<TaskArg> for Task {
    fn from(arg: TaskArg) -> Self {
        match arg {
            TaskArg::Classification => Task::Classification,
            TaskArg::Regression => Task::Regression,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json, level_from_verbosity(cli.verbose));

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %format!("{e:#}"), "command failed");
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let config = PipelineConfig::load(cli.config.as_deref()).context("Failed to load config")?;

    match cli.command {
        Commands::Synth {
            rows,
            seed,
            split,
            output,
        } => cmd_synth(&config, rows, seed, split, &output).map(|_| 0),
        Commands::Train {
            data,
            synthetic,
            top_k,
            cv_folds,
        } => cmd_train(config, data.as_deref(), synthetic, top_k, cv_folds).await,
        Commands::Drift { task, window } => cmd_drift(&config, task.into(), &window).await.map(|_| 0),
        Commands::Report => cmd_report(&config).await.map(|_| 0),
        Commands::Predict { input } => cmd_predict(&config, &input).await.map(|_| 0),
        Commands::Runs { action } => match action {
            RunsAction::Sessions => cmd_sessions(&config).await.map(|_| 0),
            RunsAction::List {
                session,
                task,
                failed,
            } => cmd_runs(&config, session, task.map(Task::from), failed)
                .await
                .map(|_| 0),
        },
    }
}

/// Exit code of the first [`PipelineError`] in the chain, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|e| e.downcast_ref::<PipelineError>())
        .map(|e| e.exit_code())
        .and_then(|code| u8::try_from(code).ok())
        .unwrap_or(1)
}

fn recorder(config: &PipelineConfig) -> Result<ExperimentRecorder> {
    let dir = &config.paths.ledger_dir;
    let ledger = FsExperimentLedger::open(dir)
        .with_context(|| format!("Failed to open ledger at {}", dir.display()))?;
    let blobs = FsBlobStore::new(dir)
        .with_context(|| format!("Failed to open blob store at {}", dir.display()))?;
    Ok(ExperimentRecorder::new(
        Arc::new(ledger),
        Arc::new(blobs),
        config.io.clone(),
    ))
}

fn store(config: &PipelineConfig) -> ArtifactStore {
    ArtifactStore::new(config.paths.artifacts_dir.clone(), config.io.clone())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .map_err(PipelineError::from)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

// ========== Training ==========

fn cmd_synth(config: &PipelineConfig, rows: usize, seed: u64, split: bool, output: &Path) -> Result<()> {
    let mut data = migraine_dataset(rows, seed)?;
    if split {
        data = train_validation_split(
            &data,
            config.training.validation_fraction,
            seed,
            config.training.stratify,
        )?;
    }
    let json = serde_json::to_vec(&data)?;
    std::fs::write(output, json).with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Wrote {} rows to {}", data.n_rows(), output.display());
    Ok(())
}

async fn cmd_train(
    mut config: PipelineConfig,
    data: Option<&Path>,
    synthetic: Option<usize>,
    top_k: Option<usize>,
    cv_folds: Option<usize>,
) -> Result<u8> {
    if let Some(k) = top_k {
        config.training.top_k = k;
    }
    if let Some(folds) = cv_folds {
        config.training.cv_folds = folds;
    }

    let matrix: FeatureMatrix = match (data, synthetic) {
        (Some(path), _) => read_json(path)?,
        (None, Some(rows)) => migraine_dataset(rows, config.training.seed)?,
        (None, None) => {
            return Err(PipelineError::InvalidInput(
                "either --data or --synthetic is required".to_string(),
            )
            .into())
        }
    };
    info!(rows = matrix.n_rows(), features = matrix.features.len(), "training data loaded");

    let pipeline = TrainingPipeline::open(config).context("Failed to open pipeline stores")?;
    let summary = pipeline.run(&matrix).await?;

    println!("Session {}", summary.session_id);
    for task in &summary.tasks {
        match &task.outcome {
            TaskOutcome::Published {
                release_id,
                top_candidate,
                top_score,
            } => println!(
                "  {:<14} published {} (top: {} {}={:.4}, {} evaluated, {} failed)",
                task.task.as_str(),
                release_id,
                top_candidate,
                task.task.primary_metric(),
                top_score,
                task.evaluated,
                task.failed
            ),
            TaskOutcome::Rejected { error, report } => println!(
                "  {:<14} rejected: {} (see {})",
                task.task.as_str(),
                error,
                report.display()
            ),
        }
    }
    println!("Report: {}", summary.report.html.display());

    Ok(u8::try_from(summary.exit_code()).unwrap_or(1))
}

// ========== Monitoring ==========

async fn cmd_drift(config: &PipelineConfig, task: Task, window: &Path) -> Result<()> {
    let history = DriftHistory::new(
        history_dir(&config.paths.reports_dir, task),
        config.io.clone(),
    );
    let monitor = DriftMonitor::new(task, store(config), history, config.drift.clone());
    let source = FileWindowSource::new(window, config.io.clone());

    match monitor.run_cycle(&source).await? {
        HistoryEntry::Checked { report } => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        HistoryEntry::Skipped { reason, .. } => {
            println!("Drift check skipped for {}: {}", task, reason);
        }
    }
    Ok(())
}

async fn cmd_report(config: &PipelineConfig) -> Result<()> {
    let store = store(config);
    let mut selections = Vec::new();
    let mut history = Vec::new();
    for task in Task::ALL {
        match store.current_release(task).await? {
            Some(release) => selections.push(store.load_selection(&release).await?),
            None => println!("No release published for {}", task),
        }
        let log = DriftHistory::new(
            history_dir(&config.paths.reports_dir, task),
            config.io.clone(),
        );
        history.extend(log.load().await?);
    }

    let report = ReportGenerator::render(&selections, &history);
    let paths = ReportGenerator::write_report(&report, &config.paths.reports_dir, &config.io).await?;
    println!("Wrote {}", paths.json.display());
    println!("Wrote {}", paths.html.display());
    Ok(())
}

// ========== Serving ==========

/// Order `values` by the model's feature names. Missing or extra names are a
/// feature mismatch.
fn feature_vector(expected: &[String], values: BTreeMap<String, f64>) -> Result<FeatureVector, PipelineError> {
    let mut sorted_expected = expected.to_vec();
    sorted_expected.sort();
    let actual: Vec<String> = values.keys().cloned().collect();
    if sorted_expected != actual {
        return Err(PipelineError::FeatureMismatch {
            expected: expected.to_vec(),
            actual,
        });
    }
    let ordered = expected
        .iter()
        .map(|name| values.get(name).copied().unwrap_or(f64::NAN))
        .collect();
    FeatureVector::new(expected.to_vec(), ordered)
}

async fn cmd_predict(config: &PipelineConfig, input: &Path) -> Result<()> {
    let predictor = MigrainePredictor::load(&store(config))
        .await
        .context("Failed to load published models")?;
    let values: BTreeMap<String, f64> = read_json(input)?;
    let vector = feature_vector(predictor.feature_names(), values)?;
    let predictions = predictor.predict(&vector)?;
    println!("{}", serde_json::to_string_pretty(&predictions)?);
    Ok(())
}

// ========== Ledger ==========

async fn cmd_sessions(config: &PipelineConfig) -> Result<()> {
    let sessions = recorder(config)?.list_sessions().await?;
    if sessions.is_empty() {
        println!("No sessions recorded");
        return Ok(());
    }
    for session in sessions {
        println!(
            "{} {} {} runs={} {:?}",
            session.opened_at.to_rfc3339(),
            session.session_id,
            session.name,
            session.run_count,
            session.status
        );
    }
    Ok(())
}

async fn cmd_runs(
    config: &PipelineConfig,
    session: Option<String>,
    task: Option<Task>,
    failed: bool,
) -> Result<()> {
    let mut filter = RunFilter::all();
    if let Some(id) = session {
        filter = filter.session(&SessionId(id));
    }
    if let Some(task) = task {
        filter = filter.task(task.as_str());
    }
    if failed {
        filter = filter.status(RecordStatus::Failed);
    }

    let runs = recorder(config)?.query(&filter).await?;
    if runs.is_empty() {
        println!("No runs match");
        return Ok(());
    }
    for run in runs {
        let run_id = run
            .run_id
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        let score = match run.validation_primary() {
            Some(v) => format!("{}={:.4}", run.task().primary_metric(), v),
            None => run.failure.clone().unwrap_or_default(),
        };
        println!(
            "{} {} {} {} {}",
            run_id,
            run.task(),
            run.candidate(),
            run.verdict(),
            score
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_train_with_overrides() {
        let cli = Cli::try_parse_from([
            "migraine", "-vv", "train", "--synthetic", "500", "--top-k", "3",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Train {
                data,
                synthetic,
                top_k,
                cv_folds,
            } => {
                assert!(data.is_none());
                assert_eq!(synthetic, Some(500));
                assert_eq!(top_k, Some(3));
                assert!(cv_folds.is_none());
            }
            _ => panic!("expected train"),
        }
    }

    #[test]
    fn data_and_synthetic_conflict() {
        let parsed = Cli::try_parse_from([
            "migraine", "train", "--data", "x.json", "--synthetic", "10",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn drift_requires_a_known_task() {
        let cli = Cli::try_parse_from([
            "migraine", "drift", "--task", "regression", "--window", "w.json",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Drift {
                task: TaskArg::Regression,
                ..
            }
        ));
        assert!(Cli::try_parse_from(["migraine", "drift", "--task", "ranking", "--window", "w"]).is_err());
    }

    #[test]
    fn exit_codes_follow_the_error_chain() {
        let invalid = anyhow::Error::from(PipelineError::InvalidInput("empty".into()))
            .context("Failed to train");
        assert_eq!(exit_code(&invalid), 2);

        let no_viable = anyhow::Error::from(PipelineError::NoViableCandidate {
            task: "regression".into(),
            viable: 1,
            required: 2,
        });
        assert_eq!(exit_code(&no_viable), 3);
        assert_eq!(exit_code(&anyhow::anyhow!("disk on fire")), 1);
    }

    #[test]
    fn feature_vector_follows_model_order() {
        let expected = vec!["b".to_string(), "a".to_string()];
        let values = BTreeMap::from([("a".to_string(), 1.0), ("b".to_string(), 2.0)]);
        let vector = feature_vector(&expected, values).unwrap();
        assert_eq!(vector.names, expected);
        assert_eq!(vector.values, vec![2.0, 1.0]);

        let missing = BTreeMap::from([("a".to_string(), 1.0)]);
        let err = feature_vector(&expected, missing).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn synth_writes_a_loadable_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("data.json");
        cmd_synth(&PipelineConfig::default(), 120, 5, true, &out).unwrap();
        let matrix: FeatureMatrix = read_json(&out).unwrap();
        assert_eq!(matrix.n_rows(), 120);
        assert!(matrix.split.is_some());
        assert!(matrix.severity.is_some());
    }
}

//! Drift monitoring daemon.
//!
//! Runs one [`DriftMonitor`] per task against the prediction windows the
//! serving layer exports to `<window-dir>/<task>.window.json`. Cycles run on
//! the configured interval until Ctrl-C; retrain signals are logged.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use futures::future::join_all;
use migraine_core::monitor::history_dir;
use migraine_core::telemetry::{init_tracing, level_from_verbosity};
use migraine_core::{
    ArtifactStore, DriftHistory, DriftMonitor, FileWindowSource, HistoryEntry, PipelineConfig,
    RetrainSignal, Task,
};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "migraine-monitord")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Periodic drift checks against the published migraine models", long_about = None)]
struct Args {
    /// Pipeline configuration file (TOML)
    #[arg(short, long, env = "MIGRAINE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding `<task>.window.json` exports
    #[arg(short, long, env = "MIGRAINE_WINDOW_DIR", default_value = "windows")]
    window_dir: PathBuf,

    /// Override drift.interval_secs
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Run a single cycle per task and exit
    #[arg(long)]
    once: bool,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long, env = "MIGRAINE_LOG_JSON")]
    log_json: bool,
}

fn window_file(dir: &Path, task: Task) -> PathBuf {
    dir.join(format!("{}.window.json", task.as_str()))
}

struct TaskMonitor {
    monitor: DriftMonitor,
    source: FileWindowSource,
}

fn build_monitors(
    config: &PipelineConfig,
    window_dir: &Path,
    signals: &mpsc::Sender<RetrainSignal>,
) -> Vec<TaskMonitor> {
    let store = ArtifactStore::new(config.paths.artifacts_dir.clone(), config.io.clone());
    Task::ALL
        .into_iter()
        .map(|task| {
            let history = DriftHistory::new(
                history_dir(&config.paths.reports_dir, task),
                config.io.clone(),
            );
            TaskMonitor {
                monitor: DriftMonitor::new(task, store.clone(), history, config.drift.clone())
                    .with_signals(signals.clone()),
                source: FileWindowSource::new(window_file(window_dir, task), config.io.clone()),
            }
        })
        .collect()
}

async fn run_once(monitors: &[TaskMonitor]) -> Result<Vec<HistoryEntry>> {
    let mut entries = Vec::with_capacity(monitors.len());
    for m in monitors {
        entries.push(m.monitor.run_cycle(&m.source).await?);
    }
    Ok(entries)
}

async fn log_signals(mut rx: mpsc::Receiver<RetrainSignal>) {
    while let Some(signal) = rx.recv().await {
        warn!(
            task = %signal.task,
            drifted = ?signal.drifted_features,
            checked_at = %signal.checked_at,
            "retrain requested: {}",
            signal.reason
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json, level_from_verbosity(args.verbose));

    let mut config = PipelineConfig::load(args.config.as_deref()).context("Failed to load config")?;
    if let Some(secs) = args.interval_secs {
        config.drift.interval_secs = secs;
    }

    let (tx, rx) = mpsc::channel(16);
    let monitors = build_monitors(&config, &args.window_dir, &tx);
    drop(tx);
    let signal_log = tokio::spawn(log_signals(rx));

    if args.once {
        for entry in run_once(&monitors).await? {
            match entry {
                HistoryEntry::Checked { report } => info!(
                    task = %report.task,
                    drift_detected = report.drift_detected,
                    "{}",
                    report.recommendation
                ),
                HistoryEntry::Skipped { task, reason, .. } => {
                    warn!(task = %task, "cycle skipped: {reason}")
                }
            }
        }
    } else {
        let interval = Duration::from_secs(config.drift.interval_secs.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
            }
            let _ = stop_tx.send(true);
        });

        info!(
            interval_secs = interval.as_secs(),
            window_dir = %args.window_dir.display(),
            "monitor started"
        );
        let cycles = join_all(monitors.iter().map(|m| {
            let mut stop = stop_rx.clone();
            m.monitor.run(&m.source, interval, async move {
                let _ = stop.wait_for(|stopped| *stopped).await;
            })
        }))
        .await;
        info!(cycles = cycles.iter().sum::<usize>(), "monitor stopped");
    }

    drop(monitors);
    let _ = signal_log.await;
    Ok(())
}

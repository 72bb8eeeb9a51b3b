//! Rolling prediction window, drift history log and the periodic monitor.
//!
//! The monitor never touches training state: it resolves the current
//! release's reference through the artifact pointer, checks the latest
//! window against it, appends the outcome to the history log and, on drift,
//! sends a [`RetrainSignal`]. Retraining itself happens elsewhere.

use std::collections::VecDeque;
use std::fs;
use std::future::Future;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::artifacts::ArtifactStore;
use crate::config::{DriftConfig, IoConfig};
use crate::domain::{FeatureColumn, FeatureMatrix, FeatureVector, PipelineError, Result, Task};
use crate::drift::{check_drift, DriftReport, Outcomes};
use crate::io::with_retry;
use crate::metrics::METRICS;
use crate::obs;

/// One served prediction, optionally joined with its realised label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowRecord {
    pub features: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<f64>,
}

impl WindowRecord {
    pub fn new(features: Vec<f64>) -> Self {
        Self {
            features,
            prediction: None,
            probability: None,
            label: None,
        }
    }

    pub fn with_prediction(mut self, prediction: f64, probability: Option<f64>) -> Self {
        self.prediction = Some(prediction);
        self.probability = probability;
        self
    }

    pub fn with_label(mut self, label: f64) -> Self {
        self.label = Some(label);
        self
    }
}

/// Bounded FIFO of the most recent predictions; the oldest record is evicted
/// once `capacity` is reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionWindow {
    feature_names: Vec<String>,
    capacity: usize,
    records: VecDeque<WindowRecord>,
}

impl PredictionWindow {
    pub fn new(feature_names: Vec<String>, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(PipelineError::InvalidInput(
                "prediction window capacity must be positive".to_string(),
            ));
        }
        Ok(Self {
            feature_names,
            capacity,
            records: VecDeque::with_capacity(capacity),
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn push(&mut self, record: WindowRecord) -> Result<()> {
        if record.features.len() != self.feature_names.len() {
            return Err(PipelineError::InvalidInput(format!(
                "window record has {} values for {} features",
                record.features.len(),
                self.feature_names.len()
            )));
        }
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
        Ok(())
    }

    /// Push a served input; names must match the window's order exactly.
    pub fn push_vector(
        &mut self,
        input: &FeatureVector,
        prediction: Option<f64>,
        probability: Option<f64>,
    ) -> Result<()> {
        if input.names != self.feature_names {
            return Err(PipelineError::FeatureMismatch {
                expected: self.feature_names.clone(),
                actual: input.names.clone(),
            });
        }
        self.push(WindowRecord {
            features: input.values.clone(),
            prediction,
            probability,
            label: None,
        })
    }

    /// Check the invariants `push` maintains. Windows that arrive through
    /// deserialization never went through `push`.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(PipelineError::InvalidInput(
                "prediction window capacity must be positive".to_string(),
            ));
        }
        if self.records.len() > self.capacity {
            return Err(PipelineError::InvalidInput(format!(
                "prediction window holds {} records, capacity is {}",
                self.records.len(),
                self.capacity
            )));
        }
        let expected = self.feature_names.len();
        if let Some((idx, record)) = self
            .records
            .iter()
            .enumerate()
            .find(|(_, r)| r.features.len() != expected)
        {
            return Err(PipelineError::InvalidInput(format!(
                "window record {idx} has {} values for {expected} features",
                record.features.len()
            )));
        }
        Ok(())
    }

    /// Column-major copy of the window. Labels become the matrix target
    /// when every record has one; outcomes are returned only when every
    /// record also has a prediction.
    pub fn snapshot(&self) -> Result<(FeatureMatrix, Option<Outcomes>)> {
        self.validate()?;
        let columns = self
            .feature_names
            .iter()
            .enumerate()
            .map(|(j, name)| {
                FeatureColumn::new(name.clone(), self.records.iter().map(|r| r.features[j]).collect())
            })
            .collect();
        let labels: Option<Vec<f64>> = self.records.iter().map(|r| r.label).collect();
        let matrix = FeatureMatrix::new(columns, labels.clone())?;

        let predictions: Option<Vec<f64>> = self.records.iter().map(|r| r.prediction).collect();
        let probabilities: Option<Vec<f64>> = self.records.iter().map(|r| r.probability).collect();
        let outcomes = labels.zip(predictions).map(|(y_true, y_pred)| Outcomes {
            y_true,
            y_pred,
            y_prob: probabilities,
        });
        Ok((matrix, outcomes))
    }
}

/// Where the monitor gets its window from.
#[async_trait]
pub trait WindowSource: Send + Sync {
    async fn snapshot(&self) -> Result<PredictionWindow>;

    /// Resolves when enough new predictions arrived to warrant an
    /// out-of-schedule cycle. Never resolves by default.
    async fn triggered(&self) {
        std::future::pending::<()>().await
    }
}

struct SharedInner {
    window: Mutex<PredictionWindow>,
    trigger_every: Option<usize>,
    since_trigger: AtomicUsize,
    notify: Notify,
}

/// In-process window shared between the serving path and the monitor.
#[derive(Clone)]
pub struct SharedWindow {
    inner: Arc<SharedInner>,
}

impl SharedWindow {
    pub fn new(window: PredictionWindow, trigger_every: Option<usize>) -> Self {
        Self {
            inner: Arc::new(SharedInner {
                window: Mutex::new(window),
                trigger_every: trigger_every.filter(|m| *m > 0),
                since_trigger: AtomicUsize::new(0),
                notify: Notify::new(),
            }),
        }
    }

    pub fn record(&self, record: WindowRecord) -> Result<()> {
        self.inner
            .window
            .lock()
            .map_err(|_| PipelineError::Io(std::io::Error::other("prediction window lock poisoned")))?
            .push(record)?;
        if let Some(every) = self.inner.trigger_every {
            if self.inner.since_trigger.fetch_add(1, Ordering::SeqCst) + 1 >= every {
                self.inner.since_trigger.store(0, Ordering::SeqCst);
                self.inner.notify.notify_one();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl WindowSource for SharedWindow {
    async fn snapshot(&self) -> Result<PredictionWindow> {
        let window = self
            .inner
            .window
            .lock()
            .map_err(|_| PipelineError::Io(std::io::Error::other("prediction window lock poisoned")))?
            .clone();
        Ok(window)
    }

    async fn triggered(&self) {
        self.inner.notify.notified().await
    }
}

/// Window exported to a JSON file by the serving collaborator.
#[derive(Debug, Clone)]
pub struct FileWindowSource {
    path: PathBuf,
    io: IoConfig,
}

impl FileWindowSource {
    pub fn new(path: impl Into<PathBuf>, io: IoConfig) -> Self {
        Self {
            path: path.into(),
            io,
        }
    }

    /// Atomically replace the window file.
    pub async fn store(&self, window: &PredictionWindow) -> Result<()> {
        let bytes = serde_json::to_vec(window)?;
        let path = self.path.clone();
        with_retry("window.store", &self.io, move || write_atomic(&path, &bytes)).await
    }
}

#[async_trait]
impl WindowSource for FileWindowSource {
    async fn snapshot(&self) -> Result<PredictionWindow> {
        let path = self.path.clone();
        let window = with_retry("window.load", &self.io, move || {
            Ok(serde_json::from_slice::<PredictionWindow>(&fs::read(&path)?)?)
        })
        .await?;
        window.validate()?;
        Ok(window)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| PipelineError::Io(e.error))?;
    Ok(())
}

/// One line of the drift history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HistoryEntry {
    Checked {
        report: DriftReport,
    },
    /// A cycle that could not run; kept at warning level, never fatal
    Skipped {
        task: Task,
        at: DateTime<Utc>,
        reason: String,
    },
}

impl HistoryEntry {
    pub fn report(&self) -> Option<&DriftReport> {
        match self {
            HistoryEntry::Checked { report } => Some(report),
            HistoryEntry::Skipped { .. } => None,
        }
    }

    pub fn task(&self) -> Task {
        match self {
            HistoryEntry::Checked { report } => report.task,
            HistoryEntry::Skipped { task, .. } => *task,
        }
    }
}

const HISTORY_FILE: &str = "history.jsonl";
const LATEST_FILE: &str = "latest.json";

/// `<reports_dir>/drift/<task>`: where the monitor writes and the evaluation
/// report reads the drift history of `task`.
pub fn history_dir(reports_dir: &Path, task: Task) -> PathBuf {
    reports_dir.join("drift").join(task.as_str())
}

/// Append-only JSONL drift history plus a `latest.json` snapshot.
#[derive(Debug, Clone)]
pub struct DriftHistory {
    dir: PathBuf,
    io: IoConfig,
}

impl DriftHistory {
    pub fn new(dir: impl Into<PathBuf>, io: IoConfig) -> Self {
        Self {
            dir: dir.into(),
            io,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn append(&self, entry: &HistoryEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let latest = serde_json::to_vec_pretty(entry)?;
        let dir = self.dir.clone();
        with_retry("drift_history.append", &self.io, move || {
            fs::create_dir_all(&dir)?;
            let mut log = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(HISTORY_FILE))?;
            log.write_all(&line)?;
            log.sync_data()?;
            write_atomic(&dir.join(LATEST_FILE), &latest)
        })
        .await
    }

    /// Every entry in append order. A torn final line is skipped.
    pub async fn load(&self) -> Result<Vec<HistoryEntry>> {
        let path = self.dir.join(HISTORY_FILE);
        with_retry("drift_history.load", &self.io, move || {
            let file = match fs::File::open(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            };
            let lines: Vec<String> = BufReader::new(file)
                .lines()
                .collect::<std::io::Result<_>>()?;
            let last = lines.len().saturating_sub(1);
            let mut entries: Vec<HistoryEntry> = Vec::with_capacity(lines.len());
            for (idx, line) in lines.iter().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str(line) {
                    Ok(entry) => entries.push(entry),
                    Err(e) if idx == last => {
                        warn!(path = %path.display(), error = %e, "skipping torn drift history tail");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(entries)
        })
        .await
    }
}

/// Sent when a cycle detects drift. Consumers schedule retraining.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainSignal {
    pub task: Task,
    pub reason: String,
    pub drifted_features: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

pub struct DriftMonitor {
    task: Task,
    store: ArtifactStore,
    history: DriftHistory,
    cfg: DriftConfig,
    signals: Option<mpsc::Sender<RetrainSignal>>,
}

impl DriftMonitor {
    pub fn new(task: Task, store: ArtifactStore, history: DriftHistory, cfg: DriftConfig) -> Self {
        Self {
            task,
            store,
            history,
            cfg,
            signals: None,
        }
    }

    pub fn with_signals(mut self, signals: mpsc::Sender<RetrainSignal>) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn history(&self) -> &DriftHistory {
        &self.history
    }

    async fn check(&self, source: &dyn WindowSource) -> Result<DriftReport> {
        let release = self.store.current_release(self.task).await?.ok_or_else(|| {
            PipelineError::DriftComputation(format!("no published {} reference", self.task))
        })?;
        let reference = self.store.load_reference(&release).await?;
        let window = source.snapshot().await?;
        let (matrix, outcomes) = window.snapshot()?;
        check_drift(&reference, &matrix, outcomes.as_ref(), &self.cfg)
    }

    fn signal(&self, report: &DriftReport) {
        METRICS.inc_drift_alerts();
        obs::emit_retrain_signalled(self.task.as_str(), &report.recommendation);
        let Some(tx) = &self.signals else {
            return;
        };
        let signal = RetrainSignal {
            task: self.task,
            reason: report.recommendation.clone(),
            drifted_features: report.drifted_features.clone(),
            checked_at: report.checked_at,
        };
        if let Err(e) = tx.try_send(signal) {
            warn!(task = %self.task, error = %e, "retrain signal dropped");
        }
    }

    /// One monitoring cycle. A failed check becomes a `Skipped` entry; only a
    /// failure to write the history log is returned as an error.
    pub async fn run_cycle(&self, source: &dyn WindowSource) -> Result<HistoryEntry> {
        METRICS.inc_drift_checks();
        let entry = match self.check(source).await {
            Ok(report) => {
                obs::emit_drift_checked(
                    self.task.as_str(),
                    report.drift_detected,
                    report.drifted_features.len(),
                    report.max_psi(),
                );
                if report.drift_detected {
                    self.signal(&report);
                }
                HistoryEntry::Checked { report }
            }
            Err(e) => {
                obs::emit_drift_cycle_skipped(self.task.as_str(), &e);
                HistoryEntry::Skipped {
                    task: self.task,
                    at: Utc::now(),
                    reason: e.to_string(),
                }
            }
        };
        self.history.append(&entry).await?;
        Ok(entry)
    }

    /// Run cycles every `interval` (first one immediately) and whenever the
    /// source triggers, until `shutdown` resolves. Returns the number of
    /// cycles whose entry reached the history log.
    pub async fn run<F>(&self, source: &dyn WindowSource, interval: Duration, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut cycles = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
                _ = source.triggered() => debug!(task = %self.task, "prediction count trigger"),
            }
            match self.run_cycle(source).await {
                Ok(_) => cycles += 1,
                Err(e) => warn!(task = %self.task, error = %e, "drift history write failed"),
            }
        }
        cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Split;
    use crate::test_support::{fast_io, quick_selection, split_dataset};

    fn window_from(matrix: &FeatureMatrix, capacity: usize) -> PredictionWindow {
        let mut window = PredictionWindow::new(matrix.feature_names(), capacity).unwrap();
        for row in matrix.rows() {
            window.push(WindowRecord::new(row)).unwrap();
        }
        window
    }

    #[test]
    fn window_evicts_oldest() {
        let mut window = PredictionWindow::new(vec!["a".into()], 3).unwrap();
        for v in 0..5 {
            window.push(WindowRecord::new(vec![v as f64])).unwrap();
        }
        assert_eq!(window.len(), 3);
        let (matrix, outcomes) = window.snapshot().unwrap();
        assert_eq!(matrix.column("a").unwrap(), &[2.0, 3.0, 4.0]);
        assert!(matrix.target.is_none());
        assert!(outcomes.is_none());
        assert!(window.push(WindowRecord::new(vec![1.0, 2.0])).is_err());
        assert!(PredictionWindow::new(vec![], 0).is_err());
    }

    #[test]
    fn outcomes_need_every_label_and_prediction() {
        let mut window = PredictionWindow::new(vec!["a".into()], 10).unwrap();
        window
            .push(WindowRecord::new(vec![1.0]).with_prediction(1.0, Some(0.9)).with_label(1.0))
            .unwrap();
        window
            .push(WindowRecord::new(vec![2.0]).with_prediction(0.0, Some(0.2)).with_label(1.0))
            .unwrap();
        let (matrix, outcomes) = window.snapshot().unwrap();
        assert_eq!(matrix.target, Some(vec![1.0, 1.0]));
        let outcomes = outcomes.unwrap();
        assert_eq!(outcomes.y_pred, vec![1.0, 0.0]);
        assert_eq!(outcomes.y_prob, Some(vec![0.9, 0.2]));

        window.push(WindowRecord::new(vec![3.0])).unwrap();
        let (matrix, outcomes) = window.snapshot().unwrap();
        assert!(matrix.target.is_none());
        assert!(outcomes.is_none());
    }

    #[test]
    fn push_vector_checks_names() {
        let mut window = PredictionWindow::new(vec!["a".into(), "b".into()], 4).unwrap();
        let swapped = FeatureVector::from_pairs([("b", 1.0), ("a", 2.0)]).unwrap();
        assert!(matches!(
            window.push_vector(&swapped, None, None),
            Err(PipelineError::FeatureMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn history_appends_and_skips_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let history = DriftHistory::new(dir.path(), fast_io());
        assert!(history.load().await.unwrap().is_empty());

        let entry = HistoryEntry::Skipped {
            task: Task::Regression,
            at: Utc::now(),
            reason: "no published regression reference".into(),
        };
        history.append(&entry).await.unwrap();
        history.append(&entry).await.unwrap();
        let mut log = fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join(HISTORY_FILE))
            .unwrap();
        log.write_all(b"{\"status\":\"chec").unwrap();

        let loaded = history.load().await.unwrap();
        assert_eq!(loaded, vec![entry.clone(), entry.clone()]);
        let latest: HistoryEntry =
            serde_json::from_slice(&fs::read(dir.path().join(LATEST_FILE)).unwrap()).unwrap();
        assert_eq!(latest, entry);
    }

    #[tokio::test]
    async fn cycle_without_release_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = DriftMonitor::new(
            Task::Classification,
            ArtifactStore::new(dir.path().join("artifacts"), fast_io()),
            DriftHistory::new(dir.path().join("drift"), fast_io()),
            DriftConfig::default(),
        );
        let source = SharedWindow::new(PredictionWindow::new(vec!["a".into()], 5).unwrap(), None);
        let entry = monitor.run_cycle(&source).await.unwrap();
        match &entry {
            HistoryEntry::Skipped { reason, .. } => assert!(reason.contains("no published")),
            other => panic!("expected skipped entry, got {other:?}"),
        }
        assert_eq!(monitor.history().load().await.unwrap(), vec![entry]);
    }

    #[tokio::test]
    async fn shifted_window_sends_retrain_signal() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("artifacts"), fast_io());
        let data = split_dataset(300, 31);
        let (selection, reference) = quick_selection(Task::Classification, &data).await;
        store.publish(&selection, &reference).await.unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let monitor = DriftMonitor::new(
            Task::Classification,
            store,
            DriftHistory::new(dir.path().join("drift"), fast_io()),
            DriftConfig::default(),
        )
        .with_signals(tx);

        let train = data.partition(Split::Train);
        let steady = SharedWindow::new(window_from(&train, 1000), None);
        let entry = monitor.run_cycle(&steady).await.unwrap();
        assert!(!entry.report().unwrap().drift_detected);
        assert!(rx.try_recv().is_err());

        let mut shifted = train.clone();
        for v in shifted.features[2].values.iter_mut() {
            *v += 6.0;
        }
        let drifting = SharedWindow::new(window_from(&shifted, 1000), None);
        let entry = monitor.run_cycle(&drifting).await.unwrap();
        let report = entry.report().unwrap();
        assert!(report.drift_detected);
        assert_eq!(report.drifted_features, vec!["sleep_hours".to_string()]);
        let signal = rx.try_recv().unwrap();
        assert_eq!(signal.task, Task::Classification);
        assert_eq!(signal.drifted_features, vec!["sleep_hours".to_string()]);
        assert_eq!(monitor.history().load().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn run_loop_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = DriftMonitor::new(
            Task::Regression,
            ArtifactStore::new(dir.path().join("artifacts"), fast_io()),
            DriftHistory::new(dir.path().join("drift"), fast_io()),
            DriftConfig::default(),
        );
        let source = SharedWindow::new(PredictionWindow::new(vec!["a".into()], 5).unwrap(), Some(2));
        let cycles = monitor
            .run(
                &source,
                Duration::from_millis(20),
                tokio::time::sleep(Duration::from_millis(120)),
            )
            .await;
        assert!(cycles >= 1);
        assert_eq!(monitor.history().load().await.unwrap().len(), cycles);
    }

    #[tokio::test]
    async fn prediction_count_triggers_notify() {
        let shared = SharedWindow::new(PredictionWindow::new(vec!["a".into()], 5).unwrap(), Some(2));
        shared.record(WindowRecord::new(vec![1.0])).unwrap();
        shared.record(WindowRecord::new(vec![2.0])).unwrap();
        tokio::time::timeout(Duration::from_secs(1), shared.triggered())
            .await
            .unwrap();
        assert_eq!(shared.snapshot().await.unwrap().len(), 2);
    }

    #[test]
    fn ragged_records_fail_the_snapshot() {
        let window: PredictionWindow = serde_json::from_value(serde_json::json!({
            "feature_names": ["a", "b"],
            "capacity": 4,
            "records": [{"features": [1.0, 2.0]}, {"features": [1.0]}]
        }))
        .unwrap();
        match window.snapshot() {
            Err(PipelineError::InvalidInput(msg)) => assert!(msg.contains("record 1"), "{msg}"),
            other => panic!("expected invalid input, got {other:?}"),
        }

        let overfull: PredictionWindow = serde_json::from_value(serde_json::json!({
            "feature_names": ["a"],
            "capacity": 1,
            "records": [{"features": [1.0]}, {"features": [2.0]}]
        }))
        .unwrap();
        assert!(overfull.validate().is_err());
    }

    #[tokio::test]
    async fn file_source_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileWindowSource::new(dir.path().join("window.json"), fast_io());
        assert!(source.snapshot().await.is_err());
        let mut window = PredictionWindow::new(vec!["a".into()], 2).unwrap();
        window.push(WindowRecord::new(vec![4.0]).with_label(1.0)).unwrap();
        source.store(&window).await.unwrap();
        assert_eq!(source.snapshot().await.unwrap(), window);
    }
}

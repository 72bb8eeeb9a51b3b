//! Published model artifacts with atomic release swap.
//!
//! Layout:
//! ```text
//! <root>/<task>/releases/<release_id>/rank{n}.model.json
//!                                    /rank{n}.meta.json
//!                                    /selection.json
//!                                    /reference.json
//! <root>/<task>/CURRENT
//! <root>/.staging/<uuid>/
//! ```
//! A release is written into a staging directory, renamed into `releases/`
//! as a whole, and only then made current by replacing the `CURRENT` pointer
//! with a temp-file rename. Readers resolve `CURRENT` first, so they see
//! either the previous complete release or the new complete release.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::debug;
use uuid::Uuid;

use crate::config::IoConfig;
use crate::domain::{ModelMetadata, PipelineError, Result, SelectionResult, Task};
use crate::drift::ReferenceDistribution;
use crate::io::with_retry;
use crate::models::TrainedModel;

const RELEASES_DIR: &str = "releases";
const STAGING_DIR: &str = ".staging";
const CURRENT_FILE: &str = "CURRENT";
const SELECTION_FILE: &str = "selection.json";
const REFERENCE_FILE: &str = "reference.json";

pub fn model_file(rank: usize) -> String {
    format!("rank{rank}.model.json")
}

pub fn meta_file(rank: usize) -> String {
    format!("rank{rank}.meta.json")
}

/// A complete, published selection for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub task: Task,
    pub release_id: String,
    pub dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    io: IoConfig,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, io: IoConfig) -> Self {
        Self {
            root: root.into(),
            io,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn task_dir(&self, task: Task) -> PathBuf {
        self.root.join(task.as_str())
    }

    fn release(&self, task: Task, release_id: &str) -> Release {
        Release {
            task,
            release_id: release_id.to_string(),
            dir: self.task_dir(task).join(RELEASES_DIR).join(release_id),
        }
    }

    /// Write every ranked model, its metadata, the selection and the drift
    /// reference as one release, then make it current.
    pub async fn publish(
        &self,
        selection: &SelectionResult,
        reference: &ReferenceDistribution,
    ) -> Result<Release> {
        let task = selection.task;
        if selection.ranked.is_empty() {
            return Err(PipelineError::InvalidInput(format!(
                "refusing to publish an empty {task} selection"
            )));
        }
        if reference.task != task {
            return Err(PipelineError::InvalidInput(format!(
                "reference captured for {}, selection is {task}",
                reference.task
            )));
        }

        let mut files: Vec<(String, Vec<u8>)> = Vec::with_capacity(selection.ranked.len() * 2 + 2);
        for (i, run) in selection.ranked.iter().enumerate() {
            let rank = i + 1;
            let model = run.model.as_ref().ok_or_else(|| {
                PipelineError::InvalidInput(format!(
                    "rank {rank} ({}) has no fitted model attached",
                    run.candidate()
                ))
            })?;
            files.push((model_file(rank), serde_json::to_vec(model.as_ref())?));
            files.push((
                meta_file(rank),
                serde_json::to_vec_pretty(&ModelMetadata::from_run(run, rank))?,
            ));
        }
        files.push((SELECTION_FILE.to_string(), serde_json::to_vec_pretty(selection)?));
        files.push((REFERENCE_FILE.to_string(), serde_json::to_vec_pretty(reference)?));

        let release_id = format!(
            "{}-{}",
            Utc::now().format("%Y%m%dT%H%M%S%3fZ"),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let root = self.root.clone();
        let id = release_id.clone();
        with_retry("artifacts.publish", &self.io, move || {
            publish_blocking(&root, task, &id, &files)
        })
        .await?;

        let release = self.release(task, &release_id);
        debug!(task = %task, release_id = %release_id, dir = %release.dir.display(), "release published");
        Ok(release)
    }

    /// The release `CURRENT` points at, if any was ever published.
    pub async fn current_release(&self, task: Task) -> Result<Option<Release>> {
        let pointer = self.task_dir(task).join(CURRENT_FILE);
        let id = with_retry("artifacts.current", &self.io, move || {
            match fs::read_to_string(&pointer) {
                Ok(text) => Ok(Some(text.trim().to_string())),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await?;
        Ok(id.filter(|id| !id.is_empty()).map(|id| self.release(task, &id)))
    }

    /// Release ids for `task`, oldest first.
    pub async fn list_releases(&self, task: Task) -> Result<Vec<String>> {
        let dir = self.task_dir(task).join(RELEASES_DIR);
        with_retry("artifacts.list", &self.io, move || {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            };
            let mut ids = Vec::new();
            for entry in entries {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    ids.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            ids.sort();
            Ok(ids)
        })
        .await
    }

    async fn read_json<T>(&self, op: &str, path: PathBuf) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        with_retry(op, &self.io, move || {
            let bytes = fs::read(&path)?;
            Ok(serde_json::from_slice(&bytes)?)
        })
        .await
    }

    pub async fn load_model(&self, release: &Release, rank: usize) -> Result<TrainedModel> {
        self.read_json("artifacts.load_model", release.dir.join(model_file(rank)))
            .await
    }

    pub async fn load_metadata(&self, release: &Release, rank: usize) -> Result<ModelMetadata> {
        self.read_json("artifacts.load_metadata", release.dir.join(meta_file(rank)))
            .await
    }

    pub async fn load_reference(&self, release: &Release) -> Result<ReferenceDistribution> {
        self.read_json("artifacts.load_reference", release.dir.join(REFERENCE_FILE))
            .await
    }

    /// The published selection with every ranked model re-attached.
    pub async fn load_selection(&self, release: &Release) -> Result<SelectionResult> {
        let mut selection: SelectionResult = self
            .read_json("artifacts.load_selection", release.dir.join(SELECTION_FILE))
            .await?;
        for (i, run) in selection.ranked.iter_mut().enumerate() {
            run.model = Some(Arc::new(self.load_model(release, i + 1).await?));
        }
        Ok(selection)
    }
}

/// Stage, rename into place, swap the pointer. Safe to re-run after a
/// failure at any step.
fn publish_blocking(
    root: &Path,
    task: Task,
    release_id: &str,
    files: &[(String, Vec<u8>)],
) -> Result<()> {
    let task_dir = root.join(task.as_str());
    let releases = task_dir.join(RELEASES_DIR);
    let final_dir = releases.join(release_id);
    fs::create_dir_all(&releases)?;

    if !final_dir.exists() {
        let staging_root = root.join(STAGING_DIR);
        fs::create_dir_all(&staging_root)?;
        let staging = staging_root.join(Uuid::new_v4().to_string());
        fs::create_dir(&staging)?;
        let staged = stage_files(&staging, files).and_then(|()| {
            fs::rename(&staging, &final_dir)?;
            Ok(())
        });
        if let Err(e) = staged {
            let _ = fs::remove_dir_all(&staging);
            // Ids are unique: an earlier attempt already moved it into place.
            if !final_dir.is_dir() {
                return Err(e);
            }
            debug!(release_id = %release_id, "release directory already in place");
        }
    }

    let mut pointer = NamedTempFile::new_in(&task_dir)?;
    pointer.write_all(release_id.as_bytes())?;
    pointer.write_all(b"\n")?;
    pointer.as_file().sync_all()?;
    pointer
        .persist(task_dir.join(CURRENT_FILE))
        .map_err(|e| PipelineError::Io(e.error))?;
    Ok(())
}

fn stage_files(dir: &Path, files: &[(String, Vec<u8>)]) -> Result<()> {
    for (name, bytes) in files {
        let mut file = fs::File::create(dir.join(name))?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fast_io, quick_selection, split_dataset};

    #[tokio::test]
    async fn nothing_is_current_before_first_publish() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), fast_io());
        assert!(store.current_release(Task::Classification).await.unwrap().is_none());
        assert!(store.list_releases(Task::Classification).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), fast_io());
        let data = split_dataset(240, 5);
        let (selection, reference) = quick_selection(Task::Classification, &data).await;

        let release = store.publish(&selection, &reference).await.unwrap();
        let current = store.current_release(Task::Classification).await.unwrap().unwrap();
        assert_eq!(current, release);

        for rank in 1..=2 {
            assert!(release.dir.join(model_file(rank)).exists());
            let meta = store.load_metadata(&release, rank).await.unwrap();
            assert_eq!(meta.model_rank, rank);
            assert_eq!(meta.feature_names, data.feature_names());
            assert!(meta.metrics.validation_confusion.is_some());
        }
        let loaded = store.load_selection(&release).await.unwrap();
        assert_eq!(loaded.ranked.len(), 2);
        assert_eq!(
            loaded.ranked[0].model.as_deref(),
            selection.ranked[0].model.as_deref()
        );
        assert_eq!(store.load_reference(&release).await.unwrap(), reference);
        assert!(!dir.path().join(STAGING_DIR).read_dir().unwrap().any(|_| true));
    }

    #[tokio::test]
    async fn metadata_bytes_are_identical_across_publishes() {
        let data = split_dataset(240, 6);
        let (selection, reference) = quick_selection(Task::Classification, &data).await;

        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let ra = ArtifactStore::new(a.path(), fast_io())
            .publish(&selection, &reference)
            .await
            .unwrap();
        let rb = ArtifactStore::new(b.path(), fast_io())
            .publish(&selection, &reference)
            .await
            .unwrap();
        for name in [meta_file(1), meta_file(2), model_file(1), SELECTION_FILE.to_string()] {
            let left = fs::read(ra.dir.join(&name)).unwrap();
            let right = fs::read(rb.dir.join(&name)).unwrap();
            assert_eq!(left, right, "{name} differs");
        }
    }

    #[tokio::test]
    async fn republish_supersedes_without_deleting() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), fast_io());
        let data = split_dataset(240, 7);
        let (selection, reference) = quick_selection(Task::Classification, &data).await;

        let first = store.publish(&selection, &reference).await.unwrap();
        let second = store.publish(&selection, &reference).await.unwrap();
        assert_ne!(first.release_id, second.release_id);
        assert_eq!(
            store.current_release(Task::Classification).await.unwrap().unwrap(),
            second
        );
        assert_eq!(store.list_releases(Task::Classification).await.unwrap().len(), 2);
        assert!(first.dir.join(meta_file(1)).exists());
    }

    #[test]
    fn publishing_the_same_release_twice_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![
            (meta_file(1), b"{}".to_vec()),
            (SELECTION_FILE.to_string(), b"{}".to_vec()),
        ];
        publish_blocking(dir.path(), Task::Regression, "r-1", &files).unwrap();
        publish_blocking(dir.path(), Task::Regression, "r-1", &files).unwrap();

        let task_dir = dir.path().join(Task::Regression.as_str());
        assert_eq!(fs::read_to_string(task_dir.join(CURRENT_FILE)).unwrap().trim(), "r-1");
        assert!(task_dir.join(RELEASES_DIR).join("r-1").join(meta_file(1)).exists());
        assert!(!dir.path().join(STAGING_DIR).read_dir().unwrap().any(|_| true));
    }

    #[tokio::test]
    async fn selection_without_models_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), fast_io());
        let data = split_dataset(240, 8);
        let (mut selection, reference) = quick_selection(Task::Classification, &data).await;
        selection.ranked[1].model = None;

        let err = store.publish(&selection, &reference).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
        assert!(store.current_release(Task::Classification).await.unwrap().is_none());
    }
}

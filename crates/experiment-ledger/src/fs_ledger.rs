//! Filesystem-backed experiment ledger.
//!
//! Layout:
//!
//! ```text
//! <root>/sessions/<session_id>/session.json   header, rewritten atomically on open/close
//! <root>/sessions/<session_id>/runs.jsonl     one ExperimentRecord per line, append-only
//! ```
//!
//! The full ledger is indexed in memory on [`FsExperimentLedger::open`]; every
//! append is written through to disk before it becomes visible to `query`.
//! Disk writes run on the blocking pool, one at a time, and never under the
//! index lock.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::LedgerError;
use crate::fakes::{lock, LedgerState, SessionState};
use crate::storage_traits::*;

const SESSION_FILE: &str = "session.json";
const RUNS_FILE: &str = "runs.jsonl";

/// Append-only JSONL ledger rooted at a directory.
pub struct FsExperimentLedger {
    sessions_dir: PathBuf,
    state: Mutex<LedgerState>,
    /// Serializes disk writes so seq numbers hit the log in order
    writer: tokio::sync::Mutex<()>,
}

impl FsExperimentLedger {
    /// Open (or create) a ledger at `root`, loading every existing session.
    pub fn open(root: impl AsRef<Path>) -> LedgerResult<Self> {
        let sessions_dir = root.as_ref().join("sessions");
        fs::create_dir_all(&sessions_dir)?;

        let mut sessions = Vec::new();
        for entry in fs::read_dir(&sessions_dir)? {
            let dir = entry?.path();
            if !dir.join(SESSION_FILE).exists() {
                continue;
            }
            sessions.push(load_session(&dir)?);
        }
        sessions.sort_by(|a: &SessionState, b: &SessionState| {
            a.header
                .opened_at
                .cmp(&b.header.opened_at)
                .then_with(|| a.header.session_id.cmp(&b.header.session_id))
        });
        debug!(sessions = sessions.len(), dir = %sessions_dir.display(), "ledger opened");

        Ok(Self {
            sessions_dir,
            state: Mutex::new(LedgerState { sessions }),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.sessions_dir.join(&id.0)
    }
}

fn load_session(dir: &Path) -> LedgerResult<SessionState> {
    let header: SessionRecord = serde_json::from_slice(&fs::read(dir.join(SESSION_FILE))?)?;
    let runs_path = dir.join(RUNS_FILE);
    let mut runs = Vec::new();

    if runs_path.exists() {
        let lines: Vec<String> = BufReader::new(fs::File::open(&runs_path)?)
            .lines()
            .collect::<std::io::Result<_>>()?;
        let last = lines.len().saturating_sub(1);
        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ExperimentRecord>(line) {
                Ok(record) => runs.push(record),
                // A torn final line means the writer died mid-append; the run
                // was never acknowledged, so dropping it keeps the log consistent.
                Err(e) if idx == last => {
                    warn!(path = %runs_path.display(), error = %e, "skipping torn ledger tail");
                }
                Err(e) => {
                    return Err(LedgerError::Corrupt {
                        path: runs_path.display().to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }
    }

    let mut header = header;
    header.run_count = runs.iter().map(|r| r.run_id.seq).max().unwrap_or(0);
    Ok(SessionState { header, runs })
}

pub(crate) async fn blocking<T, F>(f: F) -> LedgerResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> LedgerResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LedgerError::Io(io::Error::other(e)))?
}

/// The file operations an append needs to undo a partial write.
trait LogFile: Write {
    fn len(&self) -> io::Result<u64>;
    fn truncate(&self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Append one line. A failed write is cut back to the previous length so a
/// torn line never ends up in the middle of the log.
fn append_line(file: &mut impl LogFile, line: &[u8]) -> LedgerResult<()> {
    let before = file.len()?;
    if let Err(e) = file.write_all(line).and_then(|()| file.flush()) {
        if let Err(undo) = file.truncate(before) {
            warn!(error = %undo, "could not cut back a partial ledger append");
        }
        return Err(e.into());
    }
    Ok(())
}

fn write_header(dir: &Path, header: &SessionRecord) -> LedgerResult<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&serde_json::to_vec_pretty(header)?)?;
    tmp.persist(dir.join(SESSION_FILE)).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl ExperimentLedger for FsExperimentLedger {
    async fn open_session(&self, name: &str) -> LedgerResult<SessionId> {
        let session = SessionState::open(name);
        let id = session.header.session_id.clone();
        let dir = self.session_dir(&id);
        let header = session.header.clone();
        blocking(move || {
            fs::create_dir_all(&dir)?;
            write_header(&dir, &header)
        })
        .await?;
        lock(&self.state, "ledger")?.sessions.push(session);
        Ok(id)
    }

    async fn record(&self, session: &SessionId, entry: ExperimentEntry) -> LedgerResult<RunId> {
        let _writer = self.writer.lock().await;
        let record = lock(&self.state, "ledger")?.session(session)?.prepare(entry)?;

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        let path = self.session_dir(session).join(RUNS_FILE);
        blocking(move || {
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            append_line(&mut file, &line)
        })
        .await?;

        let run_id = record.run_id.clone();
        lock(&self.state, "ledger")?.session_mut(session)?.commit(record);
        Ok(run_id)
    }

    async fn query(&self, filter: &RunFilter) -> LedgerResult<Vec<ExperimentRecord>> {
        Ok(lock(&self.state, "ledger")?.query(filter))
    }

    async fn get_session(&self, session: &SessionId) -> LedgerResult<SessionRecord> {
        let state = lock(&self.state, "ledger")?;
        Ok(state.session(session)?.header.clone())
    }

    async fn list_sessions(&self) -> LedgerResult<Vec<SessionRecord>> {
        let state = lock(&self.state, "ledger")?;
        Ok(state.sessions.iter().map(|s| s.header.clone()).collect())
    }

    async fn close_session(&self, session: &SessionId) -> LedgerResult<SessionRecord> {
        let _writer = self.writer.lock().await;
        let header = lock(&self.state, "ledger")?.session(session)?.closed_header()?;

        let dir = self.session_dir(session);
        let on_disk = header.clone();
        blocking(move || {
            let runs_path = dir.join(RUNS_FILE);
            if runs_path.exists() {
                OpenOptions::new().append(true).open(&runs_path)?.sync_all()?;
            }
            write_header(&dir, &on_disk)
        })
        .await?;

        lock(&self.state, "ledger")?.session_mut(session)?.header = header.clone();
        debug!(session_id = %session, runs = header.run_count, "session closed");
        Ok(header)
    }
}

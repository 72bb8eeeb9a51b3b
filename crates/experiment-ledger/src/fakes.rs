//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryBlobStore` and `MemoryExperimentLedger` that satisfy the
//! trait contracts without touching the filesystem.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::LedgerError;
use crate::storage_traits::*;

pub(crate) fn lock<'a, T>(m: &'a Mutex<T>, what: &str) -> LedgerResult<MutexGuard<'a, T>> {
    m.lock().map_err(|_| LedgerError::Poisoned(what.to_string()))
}

// ---------------------------------------------------------------------------
// MemoryBlobStore
// ---------------------------------------------------------------------------

/// In-memory content-addressed store backed by a `HashMap<digest, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    store: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: &[u8]) -> LedgerResult<ContentDigest> {
        let digest = ContentDigest::from_bytes(data);
        let mut store = lock(&self.store, "blob store")?;
        store.insert(digest.as_str().to_string(), data.to_vec());
        Ok(digest)
    }

    async fn get(&self, digest: &ContentDigest) -> LedgerResult<Vec<u8>> {
        let store = lock(&self.store, "blob store")?;
        store
            .get(digest.as_str())
            .cloned()
            .ok_or_else(|| LedgerError::NotFound {
                digest: digest.as_str().to_string(),
            })
    }

    async fn contains(&self, digest: &ContentDigest) -> LedgerResult<bool> {
        let store = lock(&self.store, "blob store")?;
        Ok(store.contains_key(digest.as_str()))
    }
}

// ---------------------------------------------------------------------------
// MemoryExperimentLedger
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) header: SessionRecord,
    pub(crate) runs: Vec<ExperimentRecord>,
}

impl SessionState {
    pub(crate) fn open(name: &str) -> Self {
        Self {
            header: SessionRecord {
                session_id: SessionId::new(),
                name: name.to_string(),
                status: SessionStatus::Open,
                run_count: 0,
                opened_at: Utc::now(),
                closed_at: None,
            },
            runs: Vec::new(),
        }
    }

    /// Build the next record without appending it. Caller holds the ledger lock.
    pub(crate) fn prepare(&self, entry: ExperimentEntry) -> LedgerResult<ExperimentRecord> {
        if self.header.status == SessionStatus::Closed {
            return Err(LedgerError::SessionClosed {
                session_id: self.header.session_id.0.clone(),
            });
        }
        Ok(ExperimentRecord {
            run_id: RunId {
                session: self.header.session_id.clone(),
                seq: self.header.run_count + 1,
            },
            entry,
            recorded_at: Utc::now(),
        })
    }

    /// Make a prepared record visible.
    pub(crate) fn commit(&mut self, record: ExperimentRecord) {
        self.header.run_count = self.header.run_count.max(record.run_id.seq);
        self.runs.push(record);
    }

    pub(crate) fn append(&mut self, entry: ExperimentEntry) -> LedgerResult<ExperimentRecord> {
        let record = self.prepare(entry)?;
        self.commit(record.clone());
        Ok(record)
    }

    /// The header as it reads once closed; the session itself is unchanged.
    pub(crate) fn closed_header(&self) -> LedgerResult<SessionRecord> {
        if self.header.status == SessionStatus::Closed {
            return Err(LedgerError::SessionClosed {
                session_id: self.header.session_id.0.clone(),
            });
        }
        Ok(SessionRecord {
            status: SessionStatus::Closed,
            closed_at: Some(Utc::now()),
            ..self.header.clone()
        })
    }

    pub(crate) fn close(&mut self) -> LedgerResult<SessionRecord> {
        self.header = self.closed_header()?;
        Ok(self.header.clone())
    }
}

/// Sessions in open order; each holds its append-only run list.
#[derive(Debug, Default)]
pub(crate) struct LedgerState {
    pub(crate) sessions: Vec<SessionState>,
}

impl LedgerState {
    pub(crate) fn session_mut(&mut self, id: &SessionId) -> LedgerResult<&mut SessionState> {
        self.sessions
            .iter_mut()
            .find(|s| s.header.session_id == *id)
            .ok_or_else(|| LedgerError::SessionNotFound {
                session_id: id.0.clone(),
            })
    }

    pub(crate) fn session(&self, id: &SessionId) -> LedgerResult<&SessionState> {
        self.sessions
            .iter()
            .find(|s| s.header.session_id == *id)
            .ok_or_else(|| LedgerError::SessionNotFound {
                session_id: id.0.clone(),
            })
    }

    pub(crate) fn query(&self, filter: &RunFilter) -> Vec<ExperimentRecord> {
        self.sessions
            .iter()
            .flat_map(|s| s.runs.iter())
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }
}

/// In-memory experiment ledger.
#[derive(Debug, Default)]
pub struct MemoryExperimentLedger {
    state: Mutex<LedgerState>,
}

impl MemoryExperimentLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExperimentLedger for MemoryExperimentLedger {
    async fn open_session(&self, name: &str) -> LedgerResult<SessionId> {
        let session = SessionState::open(name);
        let id = session.header.session_id.clone();
        lock(&self.state, "ledger")?.sessions.push(session);
        Ok(id)
    }

    async fn record(&self, session: &SessionId, entry: ExperimentEntry) -> LedgerResult<RunId> {
        let mut state = lock(&self.state, "ledger")?;
        let record = state.session_mut(session)?.append(entry)?;
        Ok(record.run_id)
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
        let mut state = lock(&self.state, "ledger")?;
        state.session_mut(session)?.close()
    }
}

//! Storage trait definitions for the experiment ledger
//!
//! These traits define the core storage abstractions:
//! - `BlobStore`: Content-addressed storage for serialized models (put/get by digest)
//! - `ExperimentLedger`: Append-only run log grouped into training sessions
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::LedgerError;

/// Result type for ledger operations
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

// ---------------------------------------------------------------------------
// BlobStore — Content-Addressed Storage
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = LedgerError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(LedgerError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(d: ContentDigest) -> Self {
        d.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content-addressed blob store.
///
/// Guarantees:
/// - `put(data)` always returns the SHA-256 digest of `data`.
/// - `get(digest)` returns the exact bytes previously stored.
/// - Same content always yields the same digest (deduplication).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes and return their content digest.
    async fn put(&self, data: &[u8]) -> LedgerResult<ContentDigest>;

    /// Retrieve bytes by digest. Returns `LedgerError::NotFound` if absent.
    async fn get(&self, digest: &ContentDigest) -> LedgerResult<Vec<u8>>;

    /// Check whether a digest exists in the store.
    async fn contains(&self, digest: &ContentDigest) -> LedgerResult<bool>;
}

// ---------------------------------------------------------------------------
// ExperimentLedger — append-only run log
// ---------------------------------------------------------------------------

/// Identifier of one training session (one invocation of the trainer).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new random SessionId
    pub fn new() -> Self {
        SessionId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Run identifier: globally unique through the session id, monotonic through `seq`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId {
    pub session: SessionId,
    /// 1-based, strictly increasing within the session
    pub seq: u64,
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{:04}", self.session, self.seq)
    }
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Closed,
}

/// Session header record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    /// Human-readable run name (e.g. "migraine_prediction")
    pub name: String,
    pub status: SessionStatus,
    pub run_count: u64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Terminal status of a candidate run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Succeeded,
    Failed,
}

/// What a caller appends. The ledger assigns the [`RunId`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentEntry {
    /// Task label ("classification" | "regression")
    pub task: String,
    /// Candidate name, unique within the task catalog
    pub candidate: String,
    /// Position of the candidate in its catalog
    pub catalog_index: usize,
    pub status: RecordStatus,
    /// Digest of the serialized fitted model in the blob store
    pub model_digest: Option<ContentDigest>,
    /// Domain payload (params, metric snapshots, diagnosis)
    pub payload: serde_json::Value,
    pub fitted_at: DateTime<Utc>,
}

/// A recorded, immutable run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub run_id: RunId,
    #[serde(flatten)]
    pub entry: ExperimentEntry,
    pub recorded_at: DateTime<Utc>,
}

/// Query filter; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunFilter {
    pub session: Option<SessionId>,
    pub task: Option<String>,
    pub candidate: Option<String>,
    pub status: Option<RecordStatus>,
}

impl RunFilter {
    /// Filter that matches every run.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn session(mut self, session: &SessionId) -> Self {
        self.session = Some(session.clone());
        self
    }

    pub fn task(mut self, task: &str) -> Self {
        self.task = Some(task.to_string());
        self
    }

    pub fn candidate(mut self, candidate: &str) -> Self {
        self.candidate = Some(candidate.to_string());
        self
    }

    pub fn status(mut self, status: RecordStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Whether `record` satisfies every populated field.
    pub fn matches(&self, record: &ExperimentRecord) -> bool {
        self.session
            .as_ref()
            .map(|s| record.run_id.session == *s)
            .unwrap_or(true)
            && self
                .task
                .as_ref()
                .map(|t| record.entry.task == *t)
                .unwrap_or(true)
            && self
                .candidate
                .as_ref()
                .map(|c| record.entry.candidate == *c)
                .unwrap_or(true)
            && self
                .status
                .map(|s| record.entry.status == s)
                .unwrap_or(true)
    }
}

/// Append-only experiment ledger.
///
/// Guarantees:
/// - `record` never reuses a `RunId`; `seq` is strictly increasing per session,
///   also under concurrent appends.
/// - Recorded runs are immutable.
/// - A session transitions Open → Closed once; closed sessions reject appends.
/// - `query` returns runs ordered by (session open order, seq).
#[async_trait]
pub trait ExperimentLedger: Send + Sync {
    /// Open a new training session.
    async fn open_session(&self, name: &str) -> LedgerResult<SessionId>;

    /// Append a run to an open session.
    async fn record(&self, session: &SessionId, entry: ExperimentEntry) -> LedgerResult<RunId>;

    /// Return all runs matching `filter`.
    async fn query(&self, filter: &RunFilter) -> LedgerResult<Vec<ExperimentRecord>>;

    /// Fetch a session header.
    async fn get_session(&self, session: &SessionId) -> LedgerResult<SessionRecord>;

    /// List sessions, oldest first.
    async fn list_sessions(&self) -> LedgerResult<Vec<SessionRecord>>;

    /// Flush and close a session.
    async fn close_session(&self, session: &SessionId) -> LedgerResult<SessionRecord>;
}

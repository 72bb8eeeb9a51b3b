//! Error types for experiment-ledger

use thiserror::Error;

/// Errors raised by ledger and blob store implementations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Blob lookup by digest failed
    #[error("blob not found: {digest}")]
    NotFound { digest: String },

    /// Unknown training session
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// Append attempted on a session that was already flushed and closed
    #[error("session {session_id} is closed")]
    SessionClosed { session_id: String },

    /// Digest string is not 64-char hex
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// An on-disk ledger line could not be decoded
    #[error("corrupt ledger entry in {path}: {reason}")]
    Corrupt { path: String, reason: String },

    /// A writer panicked while holding the ledger lock
    #[error("ledger lock poisoned: {0}")]
    Poisoned(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    /// Whether retrying the same operation could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

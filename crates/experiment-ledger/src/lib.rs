//! Experiment-Ledger: persistence layer for the migraine modelling pipeline.
//!
//! This crate owns every byte the training pipeline writes about *past* work:
//! the append-only log of candidate runs grouped into training sessions, and
//! the content-addressed blob store holding serialized fitted models.
//!
//! ## Key Components
//!
//! - `ExperimentLedger`: sessions + append-only run records + filtered queries
//! - `BlobStore`: put/get model blobs by SHA-256 digest
//! - `fakes`: in-memory implementations for tests
//! - `FsExperimentLedger` / `FsBlobStore`: filesystem implementations

mod cas;
mod error;
pub mod fakes;
mod fs_ledger;
pub mod storage_traits;

pub use cas::FsBlobStore;
pub use error::LedgerError;
pub use fs_ledger::FsExperimentLedger;
pub use storage_traits::{
    BlobStore, ContentDigest, ExperimentEntry, ExperimentLedger, ExperimentRecord, LedgerResult,
    RecordStatus, RunFilter, RunId, SessionId, SessionRecord, SessionStatus,
};

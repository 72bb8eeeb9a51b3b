//! Trait contract tests for BlobStore and ExperimentLedger.
//!
//! Every conforming implementation must pass these; each contract runs against
//! the in-memory fake and the filesystem implementation.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use experiment_ledger::fakes::{MemoryBlobStore, MemoryExperimentLedger};
use experiment_ledger::storage_traits::*;
use experiment_ledger::{FsBlobStore, FsExperimentLedger, LedgerError};

fn entry(task: &str, candidate: &str, status: RecordStatus) -> ExperimentEntry {
    ExperimentEntry {
        task: task.to_string(),
        candidate: candidate.to_string(),
        catalog_index: 0,
        status,
        model_digest: None,
        payload: serde_json::json!({"verdict": "well_fit"}),
        fitted_at: Utc::now(),
    }
}

fn ledgers() -> Vec<(tempfile::TempDir, Arc<dyn ExperimentLedger>)> {
    let mem_dir = tempfile::tempdir().unwrap();
    let fs_dir = tempfile::tempdir().unwrap();
    let fs = FsExperimentLedger::open(fs_dir.path()).unwrap();
    vec![
        (mem_dir, Arc::new(MemoryExperimentLedger::new())),
        (fs_dir, Arc::new(fs)),
    ]
}

fn blob_stores() -> Vec<(tempfile::TempDir, Arc<dyn BlobStore>)> {
    let mem_dir = tempfile::tempdir().unwrap();
    let fs_dir = tempfile::tempdir().unwrap();
    let fs = FsBlobStore::new(fs_dir.path()).unwrap();
    vec![
        (mem_dir, Arc::new(MemoryBlobStore::new())),
        (fs_dir, Arc::new(fs)),
    ]
}

// ===========================================================================
// BlobStore contract tests
// ===========================================================================

#[tokio::test]
async fn blob_put_returns_content_digest() {
    for (_dir, store) in blob_stores() {
        let digest = store.put(b"fitted forest").await.unwrap();
        assert_eq!(digest, ContentDigest::from_bytes(b"fitted forest"));
        assert!(store.contains(&digest).await.unwrap());
        assert_eq!(store.get(&digest).await.unwrap(), b"fitted forest");
    }
}

#[tokio::test]
async fn blob_get_missing_is_not_found() {
    for (_dir, store) in blob_stores() {
        let bogus = ContentDigest::from_bytes(b"bogus");
        let err = store.get(&bogus).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));
    }
}

// ===========================================================================
// ExperimentLedger contract tests
// ===========================================================================

#[tokio::test]
async fn record_assigns_monotonic_seq_within_session() {
    for (_dir, ledger) in ledgers() {
        let session = ledger.open_session("migraine_prediction").await.unwrap();
        let a = ledger
            .record(&session, entry("classification", "random_forest", RecordStatus::Succeeded))
            .await
            .unwrap();
        let b = ledger
            .record(&session, entry("classification", "k_neighbors", RecordStatus::Succeeded))
            .await
            .unwrap();

        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
        assert_eq!(a.session, session);
    }
}

#[tokio::test]
async fn run_ids_unique_across_sessions() {
    for (_dir, ledger) in ledgers() {
        let s1 = ledger.open_session("first").await.unwrap();
        let s2 = ledger.open_session("second").await.unwrap();
        let a = ledger
            .record(&s1, entry("regression", "ridge", RecordStatus::Succeeded))
            .await
            .unwrap();
        let b = ledger
            .record(&s2, entry("regression", "ridge", RecordStatus::Succeeded))
            .await
            .unwrap();

        assert_eq!(a.seq, b.seq);
        assert_ne!(a, b);
    }
}

#[tokio::test]
async fn concurrent_appends_lose_nothing_and_never_reuse_ids() {
    for (_dir, ledger) in ledgers() {
        let session = ledger.open_session("parallel").await.unwrap();

        let appends = (0..16).map(|i| {
            let ledger = Arc::clone(&ledger);
            let session = session.clone();
            tokio::spawn(async move {
                ledger
                    .record(
                        &session,
                        entry("classification", &format!("candidate-{i}"), RecordStatus::Succeeded),
                    )
                    .await
            })
        });
        let ids: Vec<RunId> = futures::future::join_all(appends)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let unique: HashSet<u64> = ids.iter().map(|id| id.seq).collect();
        assert_eq!(unique.len(), 16);
        assert_eq!(unique.iter().max(), Some(&16));

        let runs = ledger.query(&RunFilter::all().session(&session)).await.unwrap();
        assert_eq!(runs.len(), 16);
        let seqs: Vec<u64> = runs.iter().map(|r| r.run_id.seq).collect();
        assert_eq!(seqs, (1..=16).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn query_filters_by_task_candidate_and_status() {
    for (_dir, ledger) in ledgers() {
        let session = ledger.open_session("filters").await.unwrap();
        ledger
            .record(&session, entry("classification", "ada_boost", RecordStatus::Succeeded))
            .await
            .unwrap();
        ledger
            .record(&session, entry("classification", "linear_svm", RecordStatus::Failed))
            .await
            .unwrap();
        ledger
            .record(&session, entry("regression", "ada_boost", RecordStatus::Succeeded))
            .await
            .unwrap();

        let classification = ledger
            .query(&RunFilter::all().task("classification"))
            .await
            .unwrap();
        assert_eq!(classification.len(), 2);

        let failed = ledger
            .query(&RunFilter::all().status(RecordStatus::Failed))
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].entry.candidate, "linear_svm");

        let boosted = ledger
            .query(&RunFilter::all().candidate("ada_boost").task("regression"))
            .await
            .unwrap();
        assert_eq!(boosted.len(), 1);
    }
}

#[tokio::test]
async fn closed_session_rejects_appends() {
    for (_dir, ledger) in ledgers() {
        let session = ledger.open_session("closing").await.unwrap();
        ledger
            .record(&session, entry("regression", "linear_svr", RecordStatus::Succeeded))
            .await
            .unwrap();
        let header = ledger.close_session(&session).await.unwrap();
        assert_eq!(header.status, SessionStatus::Closed);
        assert_eq!(header.run_count, 1);
        assert!(header.closed_at.is_some());

        let err = ledger
            .record(&session, entry("regression", "ridge", RecordStatus::Succeeded))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::SessionClosed { .. }));

        let err = ledger.close_session(&session).await.unwrap_err();
        assert!(matches!(err, LedgerError::SessionClosed { .. }));
    }
}

#[tokio::test]
async fn unknown_session_is_reported() {
    for (_dir, ledger) in ledgers() {
        let ghost = SessionId::new();
        let err = ledger
            .record(&ghost, entry("regression", "ridge", RecordStatus::Succeeded))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::SessionNotFound { .. }));
        assert!(ledger.get_session(&ghost).await.is_err());
    }
}

#[tokio::test]
async fn sessions_listed_oldest_first() {
    for (_dir, ledger) in ledgers() {
        let a = ledger.open_session("a").await.unwrap();
        let b = ledger.open_session("b").await.unwrap();
        let sessions = ledger.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_id, a);
        assert_eq!(sessions[1].session_id, b);
    }
}

//! Structured lifecycle events for training sessions and drift monitoring.
//!
//! Every event carries an `event = "<area>.<what>"` field so log pipelines
//! can filter on it regardless of message text. Set `RUST_LOG` to tune
//! verbosity and pass `--log-json` to the binaries for JSON lines.

use tracing::{info, warn};

/// Span tagging everything inside a training session with its `session_id`.
///
/// Attach it with `tracing::Instrument::instrument` so it follows the future
/// across awaits.
pub fn session_span(session_id: &str) -> tracing::Span {
    tracing::info_span!("migraine.session", session_id = %session_id)
}

pub fn emit_training_started(task: &str, candidates: usize, rows: usize) {
    info!(
        event = "training.started",
        task = %task,
        candidates = candidates,
        rows = rows,
    );
}

pub fn emit_candidate_finished(task: &str, candidate: &str, verdict: &str, primary: f64, duration_ms: u64) {
    info!(
        event = "candidate.finished",
        task = %task,
        candidate = %candidate,
        verdict = %verdict,
        validation_primary = primary,
        duration_ms = duration_ms,
    );
}

/// Warn level: the candidate is recorded as failed and skipped.
pub fn emit_candidate_failed(task: &str, candidate: &str, reason: &dyn std::fmt::Display) {
    warn!(
        event = "candidate.failed",
        task = %task,
        candidate = %candidate,
        reason = %reason,
    );
}

pub fn emit_selection_published(task: &str, release_id: &str, top_candidate: &str, top_score: f64) {
    info!(
        event = "selection.published",
        task = %task,
        release_id = %release_id,
        top_candidate = %top_candidate,
        top_score = top_score,
    );
}

pub fn emit_selection_rejected(task: &str, error: &dyn std::fmt::Display) {
    warn!(event = "selection.rejected", task = %task, error = %error);
}

pub fn emit_drift_checked(task: &str, drift_detected: bool, drifted_features: usize, max_psi: f64) {
    info!(
        event = "drift.checked",
        task = %task,
        drift_detected = drift_detected,
        drifted_features = drifted_features,
        max_psi = max_psi,
    );
}

pub fn emit_drift_cycle_skipped(task: &str, reason: &dyn std::fmt::Display) {
    warn!(event = "drift.cycle_skipped", task = %task, reason = %reason);
}

pub fn emit_retrain_signalled(task: &str, reason: &str) {
    info!(event = "retrain.signalled", task = %task, reason = %reason);
}

//! Process-wide counters. Incremented at the call site, emitted on
//! [`Metrics::flush`] as one `info!` event (end of training, daemon tick).

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    candidates_trained: AtomicU64,
    candidates_failed: AtomicU64,
    selections_published: AtomicU64,
    drift_checks: AtomicU64,
    drift_alerts: AtomicU64,
    predictions_served: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn bump(counter: &AtomicU64, name: &'static str) {
    counter.fetch_add(1, Ordering::Relaxed);
    tracing::trace!(metric = name, "counter incremented");
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            candidates_trained: AtomicU64::new(0),
            candidates_failed: AtomicU64::new(0),
            selections_published: AtomicU64::new(0),
            drift_checks: AtomicU64::new(0),
            drift_alerts: AtomicU64::new(0),
            predictions_served: AtomicU64::new(0),
        }
    }

    pub fn inc_candidates_trained(&self) {
        bump(&self.candidates_trained, "candidates_trained");
    }

    pub fn inc_candidates_failed(&self) {
        bump(&self.candidates_failed, "candidates_failed");
    }

    pub fn inc_selections_published(&self) {
        bump(&self.selections_published, "selections_published");
    }

    pub fn inc_drift_checks(&self) {
        bump(&self.drift_checks, "drift_checks");
    }

    pub fn inc_drift_alerts(&self) {
        bump(&self.drift_alerts, "drift_alerts");
    }

    pub fn inc_predictions_served(&self) {
        bump(&self.predictions_served, "predictions_served");
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            candidates_trained = self.candidates_trained(),
            candidates_failed = self.candidates_failed(),
            selections_published = self.selections_published(),
            drift_checks = self.drift_checks(),
            drift_alerts = self.drift_alerts(),
            predictions_served = self.predictions_served(),
        );
    }

    pub fn candidates_trained(&self) -> u64 {
        self.candidates_trained.load(Ordering::Relaxed)
    }

    pub fn candidates_failed(&self) -> u64 {
        self.candidates_failed.load(Ordering::Relaxed)
    }

    pub fn selections_published(&self) -> u64 {
        self.selections_published.load(Ordering::Relaxed)
    }

    pub fn drift_checks(&self) -> u64 {
        self.drift_checks.load(Ordering::Relaxed)
    }

    pub fn drift_alerts(&self) -> u64 {
        self.drift_alerts.load(Ordering::Relaxed)
    }

    pub fn predictions_served(&self) -> u64 {
        self.predictions_served.load(Ordering::Relaxed)
    }

    /// Zero every counter (tests).
    pub fn reset(&self) {
        for c in [
            &self.candidates_trained,
            &self.candidates_failed,
            &self.selections_published,
            &self.drift_checks,
            &self.drift_alerts,
            &self.predictions_served,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_independently() {
        let m = Metrics::new();
        m.inc_candidates_trained();
        m.inc_candidates_trained();
        m.inc_candidates_failed();
        m.inc_drift_checks();
        m.inc_drift_alerts();
        m.inc_predictions_served();
        m.inc_predictions_served();
        m.inc_predictions_served();

        assert_eq!(m.candidates_trained(), 2);
        assert_eq!(m.candidates_failed(), 1);
        assert_eq!(m.selections_published(), 0);
        assert_eq!(m.drift_checks(), 1);
        assert_eq!(m.drift_alerts(), 1);
        assert_eq!(m.predictions_served(), 3);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_selections_published();
        m.inc_drift_alerts();
        m.reset();
        assert_eq!(m.selections_published(), 0);
        assert_eq!(m.drift_alerts(), 0);
    }
}

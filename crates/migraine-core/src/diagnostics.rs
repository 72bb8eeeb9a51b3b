//! Diagnostic classifier: labels a fitted candidate overfit, underfit or
//! well-fit from its train and validation snapshots.
//!
//! Rules apply in priority order:
//! 1. `train - validation > overfit_gap` is overfit
//! 2. `validation < underfit_floor` is underfit
//! 3. otherwise well-fit

use crate::config::DiagnosticsConfig;
use crate::domain::{Diagnosis, DiagnosticVerdict, MetricSnapshot, PipelineError, Result, Severity};

fn primary_values(train: &MetricSnapshot, val: &MetricSnapshot, primary: &str) -> Result<(f64, f64)> {
    let t = train.get(primary).ok_or_else(|| {
        PipelineError::InvalidInput(format!("train snapshot has no '{primary}' metric"))
    })?;
    let v = val.get(primary).ok_or_else(|| {
        PipelineError::InvalidInput(format!("validation snapshot has no '{primary}' metric"))
    })?;
    Ok((t, v))
}

fn verdict_for(train: f64, val: f64, cfg: &DiagnosticsConfig) -> DiagnosticVerdict {
    if train - val > cfg.overfit_gap + cfg.gap_tolerance {
        DiagnosticVerdict::Overfit
    } else if val < cfg.underfit_floor {
        DiagnosticVerdict::Underfit
    } else {
        DiagnosticVerdict::WellFit
    }
}

pub fn classify(
    train: &MetricSnapshot,
    val: &MetricSnapshot,
    primary: &str,
    cfg: &DiagnosticsConfig,
) -> Result<DiagnosticVerdict> {
    let (t, v) = primary_values(train, val, primary)?;
    Ok(verdict_for(t, v, cfg))
}

/// [`classify`] plus gap, severity and the fixed recommendation.
pub fn diagnose(
    train: &MetricSnapshot,
    val: &MetricSnapshot,
    primary: &str,
    cfg: &DiagnosticsConfig,
) -> Result<Diagnosis> {
    let (t, v) = primary_values(train, val, primary)?;
    let gap = t - v;
    let verdict = verdict_for(t, v, cfg);
    let severity = match verdict {
        DiagnosticVerdict::Overfit if gap > cfg.high_severity_gap => Severity::High,
        DiagnosticVerdict::Underfit if v < cfg.high_severity_floor => Severity::High,
        DiagnosticVerdict::Overfit | DiagnosticVerdict::Underfit => Severity::Medium,
        DiagnosticVerdict::WellFit => Severity::None,
        DiagnosticVerdict::Failed => Severity::High,
    };
    Ok(Diagnosis {
        verdict,
        gap: Some(gap),
        severity,
        recommendation: recommendation(verdict).to_string(),
    })
}

/// Recommendation text, a function of the verdict alone.
pub fn recommendation(verdict: DiagnosticVerdict) -> &'static str {
    match verdict {
        DiagnosticVerdict::Overfit => {
            "Reduce model complexity, add regularization, or collect more training data"
        }
        DiagnosticVerdict::Underfit => "Increase model complexity or add more informative features",
        DiagnosticVerdict::WellFit => "No action needed",
        DiagnosticVerdict::Failed => "Inspect the failure reason; the candidate was excluded from ranking",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Split;
    use std::collections::BTreeMap;

    fn snap(split: Split, metric: &str, value: f64) -> MetricSnapshot {
        let mut values = BTreeMap::new();
        values.insert(metric.to_string(), value);
        MetricSnapshot::new(split, values)
    }

    fn run(train: f64, val: f64) -> DiagnosticVerdict {
        classify(
            &snap(Split::Train, "accuracy", train),
            &snap(Split::Validation, "accuracy", val),
            "accuracy",
            &DiagnosticsConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn reference_verdicts() {
        assert_eq!(run(0.95, 0.80), DiagnosticVerdict::Overfit);
        assert_eq!(run(0.72, 0.68), DiagnosticVerdict::Underfit);
        assert_eq!(run(0.85, 0.82), DiagnosticVerdict::WellFit);
    }

    #[test]
    fn gap_exactly_at_threshold_is_not_overfit() {
        assert_eq!(run(0.90, 0.80), DiagnosticVerdict::WellFit);
        assert_eq!(run(0.80, 0.70), DiagnosticVerdict::WellFit);
    }

    #[test]
    fn gap_tolerance_is_configurable() {
        let strict = DiagnosticsConfig {
            gap_tolerance: 0.0,
            ..DiagnosticsConfig::default()
        };
        let verdict = |cfg: &DiagnosticsConfig| {
            classify(
                &snap(Split::Train, "accuracy", 0.80),
                &snap(Split::Validation, "accuracy", 0.70),
                "accuracy",
                cfg,
            )
            .unwrap()
        };
        // 0.80 - 0.70 is a hair above 0.10 in binary floating point.
        assert_eq!(verdict(&DiagnosticsConfig::default()), DiagnosticVerdict::WellFit);
        assert_eq!(verdict(&strict), DiagnosticVerdict::Overfit);

        let loose = DiagnosticsConfig {
            gap_tolerance: 0.05,
            ..DiagnosticsConfig::default()
        };
        assert_eq!(
            classify(
                &snap(Split::Train, "accuracy", 0.92),
                &snap(Split::Validation, "accuracy", 0.78),
                "accuracy",
                &loose,
            )
            .unwrap(),
            DiagnosticVerdict::WellFit
        );
    }

    #[test]
    fn overfit_takes_priority_over_underfit() {
        assert_eq!(run(0.90, 0.60), DiagnosticVerdict::Overfit);
    }

    #[test]
    fn thresholds_come_from_config() {
        let cfg = DiagnosticsConfig {
            overfit_gap: 0.20,
            underfit_floor: 0.50,
            ..DiagnosticsConfig::default()
        };
        let v = classify(
            &snap(Split::Train, "r2", 0.95),
            &snap(Split::Validation, "r2", 0.80),
            "r2",
            &cfg,
        )
        .unwrap();
        assert_eq!(v, DiagnosticVerdict::WellFit);
    }

    #[test]
    fn severity_levels() {
        let cfg = DiagnosticsConfig::default();
        let d = diagnose(
            &snap(Split::Train, "accuracy", 0.99),
            &snap(Split::Validation, "accuracy", 0.75),
            "accuracy",
            &cfg,
        )
        .unwrap();
        assert_eq!(d.verdict, DiagnosticVerdict::Overfit);
        assert_eq!(d.severity, Severity::High);

        let d = diagnose(
            &snap(Split::Train, "accuracy", 0.66),
            &snap(Split::Validation, "accuracy", 0.64),
            "accuracy",
            &cfg,
        )
        .unwrap();
        assert_eq!(d.severity, Severity::Medium);

        let d = diagnose(
            &snap(Split::Train, "r2", 0.40),
            &snap(Split::Validation, "r2", 0.35),
            "r2",
            &cfg,
        )
        .unwrap();
        assert_eq!(d.verdict, DiagnosticVerdict::Underfit);
        assert_eq!(d.severity, Severity::High);
        assert_eq!(d.recommendation, recommendation(DiagnosticVerdict::Underfit));
    }

    #[test]
    fn missing_primary_metric_is_invalid_input() {
        let err = classify(
            &snap(Split::Train, "f1", 0.9),
            &snap(Split::Validation, "accuracy", 0.9),
            "accuracy",
            &DiagnosticsConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }
}

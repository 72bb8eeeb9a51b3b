//! Drift detection against the training-time reference distribution.
//!
//! Three independent signals per cycle:
//! - feature drift: PSI over bins fixed from the reference at training time
//! - statistical drift: two-sample Kolmogorov-Smirnov test per feature
//! - performance drift: realized primary metric vs. the recorded validation
//!   value, once ground truth for the window is available
//!
//! Target (label-rate) drift is reported alongside but never sets
//! `drift_detected` on its own. Each check is a pure function of the
//! reference, the window and the config.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DriftConfig;
use crate::domain::{FeatureMatrix, PipelineError, Result, Split, Task};
use crate::scoring;
use crate::stats;

/// Training-time snapshot of one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureReference {
    pub name: String,
    /// Inner bin edges; `edges.len() + 1` bins with open outer bins
    pub edges: Vec<f64>,
    pub proportions: Vec<f64>,
    /// Ascending sample kept for the KS test (capped)
    pub sample: Vec<f64>,
    pub mean: f64,
    pub std: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelDistribution {
    pub positive_rate: f64,
    pub count: usize,
}

/// Validation value of the primary metric recorded at training time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceMetric {
    pub name: String,
    pub value: f64,
}

/// Immutable drift baseline, replaced only when a new selection is published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDistribution {
    pub task: Task,
    pub feature_names: Vec<String>,
    pub features: Vec<FeatureReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_distribution: Option<LabelDistribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_metric: Option<ReferenceMetric>,
}

/// Evenly spaced order statistics, so a capped sample keeps the shape.
fn cap_sample(sorted: Vec<f64>, cap: usize) -> Vec<f64> {
    if sorted.len() <= cap {
        return sorted;
    }
    let n = sorted.len();
    (0..cap).map(|i| sorted[i * n / cap]).collect()
}

impl ReferenceDistribution {
    /// Bin edges, proportions, KS sample and moments for every column of
    /// `matrix` (normally the train partition), plus the label rate for
    /// classification.
    pub fn capture(
        task: Task,
        matrix: &FeatureMatrix,
        cfg: &DriftConfig,
        reference_metric: Option<ReferenceMetric>,
    ) -> Result<Self> {
        matrix.validate()?;
        let features = matrix
            .features
            .iter()
            .map(|column| {
                let edges = stats::quantile_edges(&column.values, cfg.bins);
                FeatureReference {
                    name: column.name.clone(),
                    proportions: stats::bin_proportions(&edges, &column.values),
                    edges,
                    sample: cap_sample(stats::sorted(&column.values), cfg.reference_sample_cap),
                    mean: stats::mean(&column.values),
                    std: stats::std_dev(&column.values),
                    count: column.values.len(),
                }
            })
            .collect();

        let label_distribution = match (task, &matrix.target) {
            (Task::Classification, Some(target)) => Some(LabelDistribution {
                positive_rate: stats::mean(target),
                count: target.len(),
            }),
            _ => None,
        };

        Ok(Self {
            task,
            feature_names: matrix.feature_names(),
            features,
            label_distribution,
            reference_metric,
        })
    }
}

/// `Σ (actual - expected) · ln(actual / expected)` over bins, with `epsilon`
/// standing in for empty bins.
pub fn population_stability_index(expected: &[f64], actual: &[f64], epsilon: f64) -> Result<f64> {
    if expected.is_empty() || expected.len() != actual.len() {
        return Err(PipelineError::DriftComputation(format!(
            "PSI needs matching non-empty bin vectors ({} vs {})",
            expected.len(),
            actual.len()
        )));
    }
    let adjust = |p: f64| if p <= 0.0 { epsilon } else { p };
    Ok(expected
        .iter()
        .zip(actual)
        .map(|(e, a)| {
            let (e, a) = (adjust(*e), adjust(*a));
            (a - e) * (a / e).ln()
        })
        .sum())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KsResult {
    pub statistic: f64,
    pub p_value: f64,
}

/// Kolmogorov distribution tail `Q_KS(λ)`; 1 when the series does not
/// converge (λ near 0).
fn kolmogorov_tail(lambda: f64) -> f64 {
    let a2 = -2.0 * lambda * lambda;
    let mut fac = 2.0;
    let mut sum = 0.0;
    let mut previous = 0.0;
    for j in 1..=100 {
        let j = j as f64;
        let term = fac * (a2 * j * j).exp();
        sum += term;
        if term.abs() <= 0.001 * previous || term.abs() <= 1e-8 * sum {
            return sum.clamp(0.0, 1.0);
        }
        fac = -fac;
        previous = term.abs();
    }
    1.0
}

/// Two-sample KS statistic with the asymptotic p-value.
pub fn ks_two_sample(a: &[f64], b: &[f64]) -> Result<KsResult> {
    if a.is_empty() || b.is_empty() {
        return Err(PipelineError::DriftComputation(
            "KS test needs two non-empty samples".to_string(),
        ));
    }
    let (a, b) = (stats::sorted(a), stats::sorted(b));
    let (n, m) = (a.len() as f64, b.len() as f64);

    let (mut i, mut j) = (0usize, 0usize);
    let mut d: f64 = 0.0;
    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        d = d.max((i as f64 / n - j as f64 / m).abs());
    }

    let en = (n * m / (n + m)).sqrt();
    let p_value = kolmogorov_tail((en + 0.12 + 0.11 / en) * d);
    Ok(KsResult {
        statistic: d,
        p_value,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PsiStatus {
    Stable,
    Moderate,
    Significant,
}

impl PsiStatus {
    pub fn classify(psi: f64, cfg: &DriftConfig) -> Self {
        if psi > cfg.psi_threshold {
            PsiStatus::Significant
        } else if psi >= cfg.psi_moderate {
            PsiStatus::Moderate
        } else {
            PsiStatus::Stable
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDrift {
    pub name: String,
    pub psi: f64,
    pub psi_status: PsiStatus,
    pub ks_statistic: f64,
    pub ks_p_value: f64,
    /// PSI significant or KS p-value below alpha
    pub drifted: bool,
    pub reference_mean: f64,
    pub window_mean: f64,
    pub reference_std: f64,
    pub window_std: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDrift {
    pub reference_positive_rate: f64,
    pub window_positive_rate: f64,
    pub change: f64,
    pub significant: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceDrift {
    pub metric: String,
    pub reference: f64,
    pub current: f64,
    /// reference - current
    pub drop: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_drop: Option<f64>,
    pub degraded: bool,
}

/// Realized outcomes for the rows of a window.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Outcomes {
    pub y_true: Vec<f64>,
    pub y_pred: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_prob: Option<Vec<f64>>,
}

/// Result of one monitoring cycle. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub task: Task,
    pub checked_at: DateTime<Utc>,
    pub window_size: usize,
    pub features: Vec<FeatureDrift>,
    /// Largest per-feature KS statistic
    pub ks_statistic: f64,
    /// Smallest per-feature KS p-value
    pub ks_p_value: f64,
    pub drifted_features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_drift: Option<TargetDrift>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<PerformanceDrift>,
    pub drift_detected: bool,
    pub recommendation: String,
}

impl DriftReport {
    pub fn max_psi(&self) -> f64 {
        self.features.iter().map(|f| f.psi).fold(0.0, f64::max)
    }
}

fn performance_drift(
    reference: &ReferenceDistribution,
    outcomes: &Outcomes,
    cfg: &DriftConfig,
) -> Result<Option<PerformanceDrift>> {
    let Some(metric) = &reference.reference_metric else {
        return Ok(None);
    };
    let snapshot = scoring::compute_metrics(
        reference.task,
        Split::Validation,
        &outcomes.y_true,
        &outcomes.y_pred,
        outcomes.y_prob.as_deref(),
    )
    .map_err(|e| PipelineError::DriftComputation(format!("scoring window outcomes: {e}")))?;
    let Some(current) = snapshot.get(&metric.name) else {
        return Ok(None);
    };

    let drop = metric.value - current;
    let relative_drop = (metric.value.abs() > f64::EPSILON).then(|| drop / metric.value.abs());
    let degraded = drop > cfg.performance_drop + cfg.performance_tolerance
        || matches!(
            (cfg.relative_performance_drop, relative_drop),
            (Some(limit), Some(rel)) if rel > limit
        );
    Ok(Some(PerformanceDrift {
        metric: metric.name.clone(),
        reference: metric.value,
        current,
        drop,
        relative_drop,
        degraded,
    }))
}

fn recommendation(
    drifted: &[String],
    performance: Option<&PerformanceDrift>,
    target: Option<&TargetDrift>,
) -> String {
    let mut parts = Vec::new();
    if !drifted.is_empty() {
        parts.push(format!(
            "Retrain: input distribution shifted for {}",
            drifted.join(", ")
        ));
    }
    if let Some(p) = performance.filter(|p| p.degraded) {
        parts.push(format!(
            "Retrain: {} dropped by {:.3} ({:.3} -> {:.3})",
            p.metric, p.drop, p.reference, p.current
        ));
    }
    if let Some(t) = target.filter(|t| t.significant) {
        parts.push(format!(
            "Investigate data: positive rate changed by {:+.3}",
            t.change
        ));
    }
    if parts.is_empty() {
        "No action needed".to_string()
    } else {
        parts.join("; ")
    }
}

/// Compare `window` (same columns as the reference, in order) against
/// `reference`. `outcomes`, when present, must align with the window rows.
pub fn check_drift(
    reference: &ReferenceDistribution,
    window: &FeatureMatrix,
    outcomes: Option<&Outcomes>,
    cfg: &DriftConfig,
) -> Result<DriftReport> {
    window
        .validate()
        .map_err(|e| PipelineError::DriftComputation(format!("window rejected: {e}")))?;
    if window.feature_names() != reference.feature_names {
        return Err(PipelineError::DriftComputation(format!(
            "window columns {:?} differ from reference columns {:?}",
            window.feature_names(),
            reference.feature_names
        )));
    }
    let rows = window.n_rows();
    if rows < cfg.min_window {
        return Err(PipelineError::DriftComputation(format!(
            "window has {rows} rows, at least {} required",
            cfg.min_window
        )));
    }
    if let Some(o) = outcomes {
        if o.y_true.len() != rows || o.y_pred.len() != rows {
            return Err(PipelineError::DriftComputation(format!(
                "outcomes cover {} / {} rows of a {rows}-row window",
                o.y_true.len(),
                o.y_pred.len()
            )));
        }
    }

    let mut features = Vec::with_capacity(reference.features.len());
    for (feature, column) in reference.features.iter().zip(&window.features) {
        let actual = stats::bin_proportions(&feature.edges, &column.values);
        let psi = population_stability_index(&feature.proportions, &actual, cfg.epsilon)?;
        let ks = ks_two_sample(&feature.sample, &column.values)?;
        let psi_status = PsiStatus::classify(psi, cfg);
        features.push(FeatureDrift {
            name: feature.name.clone(),
            psi,
            psi_status,
            ks_statistic: ks.statistic,
            ks_p_value: ks.p_value,
            drifted: psi_status == PsiStatus::Significant || ks.p_value < cfg.ks_alpha,
            reference_mean: feature.mean,
            window_mean: stats::mean(&column.values),
            reference_std: feature.std,
            window_std: stats::std_dev(&column.values),
        });
    }

    let drifted_features: Vec<String> = features
        .iter()
        .filter(|f| f.drifted)
        .map(|f| f.name.clone())
        .collect();

    let labels = outcomes
        .map(|o| o.y_true.as_slice())
        .or(window.target.as_deref());
    let target_drift = match (&reference.label_distribution, labels) {
        (Some(dist), Some(labels)) if !labels.is_empty() => {
            let rate = stats::mean(labels);
            let change = rate - dist.positive_rate;
            Some(TargetDrift {
                reference_positive_rate: dist.positive_rate,
                window_positive_rate: rate,
                change,
                significant: change.abs() > cfg.target_drift_threshold,
            })
        }
        _ => None,
    };

    let performance = match outcomes {
        Some(o) => performance_drift(reference, o, cfg)?,
        None => None,
    };

    let drift_detected = !drifted_features.is_empty()
        || performance.as_ref().is_some_and(|p| p.degraded);
    let recommendation = recommendation(
        &drifted_features,
        performance.as_ref(),
        target_drift.as_ref(),
    );

    Ok(DriftReport {
        task: reference.task,
        checked_at: Utc::now(),
        window_size: rows,
        ks_statistic: features.iter().map(|f| f.ks_statistic).fold(0.0, f64::max),
        ks_p_value: features.iter().map(|f| f.ks_p_value).fold(1.0, f64::min),
        features,
        drifted_features,
        target_drift,
        performance,
        drift_detected,
        recommendation,
    })
}

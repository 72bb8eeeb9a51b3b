//! Pipeline configuration: TOML file, then `MIGRAINE_*` environment overrides.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{PipelineError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub training: TrainingConfig,
    pub diagnostics: DiagnosticsConfig,
    pub drift: DriftConfig,
    pub io: IoConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Share of rows assigned to validation when the input declares no split
    pub validation_fraction: f64,
    pub seed: u64,
    /// Preserve the label ratio across train/validation
    pub stratify: bool,
    /// Fit candidates concurrently on the blocking pool
    pub parallel: bool,
    /// Upper bound on concurrent fits; `None` uses available parallelism
    pub max_concurrency: Option<usize>,
    /// 0 disables cross-validation
    pub cv_folds: usize,
    pub top_k: usize,
    pub experiment_name: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            validation_fraction: 0.2,
            seed: 42,
            stratify: true,
            parallel: true,
            max_concurrency: None,
            cv_folds: 3,
            top_k: 2,
            experiment_name: "migraine_prediction".to_string(),
        }
    }
}

impl TrainingConfig {
    pub fn concurrency(&self) -> usize {
        if !self.parallel {
            return 1;
        }
        self.max_concurrency
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1)
    }
}

/// Float slack on threshold comparisons, so 0.80 - 0.70 does not read as
/// greater than 0.10.
pub const DEFAULT_COMPARISON_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub overfit_gap: f64,
    pub underfit_floor: f64,
    pub high_severity_gap: f64,
    pub high_severity_floor: f64,
    /// A gap must exceed `overfit_gap` by more than this to count as overfit
    pub gap_tolerance: f64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            overfit_gap: 0.10,
            underfit_floor: 0.70,
            high_severity_gap: 0.15,
            high_severity_floor: 0.50,
            gap_tolerance: DEFAULT_COMPARISON_TOLERANCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// PSI above this flags a feature
    pub psi_threshold: f64,
    /// PSI above this (and at most `psi_threshold`) is reported as moderate
    pub psi_moderate: f64,
    pub bins: usize,
    /// Substituted for empty bins
    pub epsilon: f64,
    pub ks_alpha: f64,
    pub window_size: usize,
    /// Windows smaller than this skip the cycle
    pub min_window: usize,
    /// Absolute drop of the primary metric that flags performance drift
    pub performance_drop: f64,
    /// Optional relative drop (fraction of the reference value)
    pub relative_performance_drop: Option<f64>,
    /// A drop must exceed `performance_drop` by more than this
    pub performance_tolerance: f64,
    /// Reference sample kept per feature for the KS test
    pub reference_sample_cap: usize,
    pub target_drift_threshold: f64,
    pub interval_secs: u64,
    /// Also run a cycle after every N recorded predictions
    pub trigger_every: Option<usize>,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            psi_threshold: 0.20,
            psi_moderate: 0.10,
            bins: 10,
            epsilon: 1e-4,
            ks_alpha: 0.05,
            window_size: 1000,
            min_window: 10,
            performance_drop: 0.05,
            relative_performance_drop: None,
            performance_tolerance: DEFAULT_COMPARISON_TOLERANCE,
            reference_sample_cap: 5000,
            target_drift_threshold: 0.10,
            interval_secs: 300,
            trigger_every: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    pub timeout_ms: u64,
    pub retry_backoff_ms: u64,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            retry_backoff_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub artifacts_dir: PathBuf,
    pub ledger_dir: PathBuf,
    pub reports_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from("artifacts"),
            ledger_dir: PathBuf::from("mlruns"),
            reports_dir: PathBuf::from("reports"),
        }
    }
}

impl PipelineConfig {
    /// Defaults, overlaid by `path` when given, then by the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|e| {
                    PipelineError::Config(format!("reading {}: {e}", p.display()))
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Reads:
    /// - MIGRAINE_ARTIFACTS_DIR
    /// - MIGRAINE_LEDGER_DIR
    /// - MIGRAINE_REPORTS_DIR
    /// - MIGRAINE_DRIFT_WINDOW (integer)
    /// - MIGRAINE_SEED (integer)
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("MIGRAINE_ARTIFACTS_DIR") {
            self.paths.artifacts_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("MIGRAINE_LEDGER_DIR") {
            self.paths.ledger_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("MIGRAINE_REPORTS_DIR") {
            self.paths.reports_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("MIGRAINE_DRIFT_WINDOW") {
            self.drift.window_size = v.trim().parse().map_err(|_| {
                PipelineError::Config(format!("MIGRAINE_DRIFT_WINDOW is not an integer: {v}"))
            })?;
        }
        if let Some(v) = lookup("MIGRAINE_SEED") {
            self.training.seed = v.trim().parse().map_err(|_| {
                PipelineError::Config(format!("MIGRAINE_SEED is not an integer: {v}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.training;
        if !(t.validation_fraction > 0.0 && t.validation_fraction < 1.0) {
            return Err(PipelineError::Config(format!(
                "training.validation_fraction must be in (0, 1), got {}",
                t.validation_fraction
            )));
        }
        if t.top_k == 0 {
            return Err(PipelineError::Config("training.top_k must be at least 1".to_string()));
        }
        if t.cv_folds == 1 {
            return Err(PipelineError::Config(
                "training.cv_folds must be 0 (disabled) or at least 2".to_string(),
            ));
        }
        if t.max_concurrency == Some(0) {
            return Err(PipelineError::Config(
                "training.max_concurrency must be at least 1".to_string(),
            ));
        }

        let g = self.diagnostics.gap_tolerance;
        if !(g.is_finite() && g >= 0.0) {
            return Err(PipelineError::Config(format!(
                "diagnostics.gap_tolerance must be finite and non-negative, got {g}"
            )));
        }

        let d = &self.drift;
        if !(d.performance_tolerance.is_finite() && d.performance_tolerance >= 0.0) {
            return Err(PipelineError::Config(format!(
                "drift.performance_tolerance must be finite and non-negative, got {}",
                d.performance_tolerance
            )));
        }
        if d.bins < 2 {
            return Err(PipelineError::Config("drift.bins must be at least 2".to_string()));
        }
        if d.window_size == 0 {
            return Err(PipelineError::Config("drift.window_size must be positive".to_string()));
        }
        if d.min_window > d.window_size {
            return Err(PipelineError::Config(
                "drift.min_window cannot exceed drift.window_size".to_string(),
            ));
        }
        if !(d.epsilon > 0.0 && d.epsilon < 1.0) {
            return Err(PipelineError::Config("drift.epsilon must be in (0, 1)".to_string()));
        }
        if !(d.ks_alpha > 0.0 && d.ks_alpha < 1.0) {
            return Err(PipelineError::Config("drift.ks_alpha must be in (0, 1)".to_string()));
        }
        if d.psi_moderate > d.psi_threshold {
            return Err(PipelineError::Config(
                "drift.psi_moderate cannot exceed drift.psi_threshold".to_string(),
            ));
        }
        if d.reference_sample_cap == 0 {
            return Err(PipelineError::Config(
                "drift.reference_sample_cap must be positive".to_string(),
            ));
        }
        if d.trigger_every == Some(0) {
            return Err(PipelineError::Config("drift.trigger_every must be positive".to_string()));
        }
        if d.interval_secs == 0 {
            return Err(PipelineError::Config("drift.interval_secs must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let cfg = PipelineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.training.top_k, 2);
        assert_eq!(cfg.drift.bins, 10);
        assert_eq!(cfg.drift.window_size, 1000);
        assert_eq!(cfg.diagnostics.overfit_gap, 0.10);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            [training]
            seed = 7
            cv_folds = 0

            [drift]
            window_size = 250
            "#,
        )
        .unwrap();
        assert_eq!(cfg.training.seed, 7);
        assert_eq!(cfg.training.cv_folds, 0);
        assert_eq!(cfg.training.top_k, 2);
        assert_eq!(cfg.drift.window_size, 250);
        assert_eq!(cfg.drift.psi_threshold, 0.20);
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("MIGRAINE_ARTIFACTS_DIR", "/tmp/a"),
            ("MIGRAINE_DRIFT_WINDOW", "64"),
            ("MIGRAINE_SEED", "9"),
        ]
        .into_iter()
        .collect();
        let mut cfg = PipelineConfig::default();
        cfg.apply_env_from(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.paths.artifacts_dir, PathBuf::from("/tmp/a"));
        assert_eq!(cfg.paths.ledger_dir, PathBuf::from("mlruns"));
        assert_eq!(cfg.drift.window_size, 64);
        assert_eq!(cfg.training.seed, 9);
    }

    #[test]
    fn bad_env_value_is_config_error() {
        let mut cfg = PipelineConfig::default();
        let err = cfg
            .apply_env_from(|k| (k == "MIGRAINE_SEED").then(|| "forty-two".to_string()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn validate_rejects_nonsense() {
        let mut cfg = PipelineConfig::default();
        cfg.training.validation_fraction = 1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.training.top_k = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.drift.bins = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.drift.window_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.diagnostics.gap_tolerance = -1e-9;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.drift.performance_tolerance = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn sequential_training_uses_one_slot() {
        let cfg = TrainingConfig {
            parallel: false,
            max_concurrency: Some(8),
            ..TrainingConfig::default()
        };
        assert_eq!(cfg.concurrency(), 1);
    }
}

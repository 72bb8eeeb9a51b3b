//! Evaluation and training-failure reports.
//!
//! [`ReportGenerator::render`] is a pure function of the selections and the
//! drift history; writing it out is a separate step.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::config::IoConfig;
use crate::domain::{
    ClassReport, ConfusionMatrix, CvScore, DiagnosticVerdict, ExperimentRun, FailedCandidate, PipelineError, Result,
    SelectionResult, Severity, Task,
};
use crate::io::with_retry;
use crate::models::Algorithm;
use crate::monitor::HistoryEntry;

pub const REPORT_JSON: &str = "evaluation_report.json";
pub const REPORT_HTML: &str = "evaluation_report.html";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedModelReport {
    pub rank: usize,
    pub candidate: String,
    pub family: String,
    pub params: Algorithm,
    pub train: BTreeMap<String, f64>,
    pub validation: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cv: Option<CvScore>,
    /// Validation confusion counts, classification only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confusion: Option<ConfusionMatrix>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<ClassReport>,
    pub verdict: DiagnosticVerdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap: Option<f64>,
    pub severity: Severity,
    pub recommendation: String,
}

impl RankedModelReport {
    fn from_run(run: &ExperimentRun, rank: usize) -> Self {
        let values = |snapshot: &Option<crate::domain::MetricSnapshot>| {
            snapshot.as_ref().map(|s| s.values.clone()).unwrap_or_default()
        };
        let confusion = run.validation_metrics.as_ref().and_then(|s| s.confusion);
        Self {
            rank,
            candidate: run.candidate().to_string(),
            family: run.spec.algorithm.family().to_string(),
            params: run.spec.algorithm.clone(),
            train: values(&run.train_metrics),
            validation: values(&run.validation_metrics),
            cv: run.cv.clone(),
            confusion,
            classes: confusion.map(|c| c.class_report().to_vec()).unwrap_or_default(),
            verdict: run.diagnosis.verdict,
            gap: run.diagnosis.gap,
            severity: run.diagnosis.severity,
            recommendation: run.diagnosis.recommendation.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task: Task,
    pub primary_metric: String,
    pub evaluated: usize,
    pub models: Vec<RankedModelReport>,
    pub failed: Vec<FailedCandidate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftSummary {
    pub cycles: usize,
    pub checked: usize,
    pub skipped: usize,
    pub alerts: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_checked_at: Option<DateTime<Utc>>,
    pub latest_drifted_features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_recommendation: Option<String>,
}

impl DriftSummary {
    fn from_history(history: &[HistoryEntry]) -> Self {
        let reports: Vec<_> = history.iter().filter_map(HistoryEntry::report).collect();
        let latest = reports.iter().max_by_key(|r| r.checked_at);
        Self {
            cycles: history.len(),
            checked: reports.len(),
            skipped: history.len() - reports.len(),
            alerts: reports.iter().filter(|r| r.drift_detected).count(),
            latest_checked_at: latest.map(|r| r.checked_at),
            latest_drifted_features: latest
                .map(|r| r.drifted_features.clone())
                .unwrap_or_default(),
            latest_recommendation: latest.map(|r| r.recommendation.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Newest training timestamp among the reported models
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    pub tasks: Vec<TaskReport>,
    pub drift: DriftSummary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub json: PathBuf,
    pub html: PathBuf,
}

pub struct ReportGenerator;

impl ReportGenerator {
    pub fn render(selections: &[SelectionResult], drift_history: &[HistoryEntry]) -> EvaluationReport {
        let tasks = selections
            .iter()
            .map(|selection| TaskReport {
                task: selection.task,
                primary_metric: selection.primary_metric.clone(),
                evaluated: selection.evaluated,
                models: selection
                    .ranked
                    .iter()
                    .enumerate()
                    .map(|(i, run)| RankedModelReport::from_run(run, i + 1))
                    .collect(),
                failed: selection.failed.clone(),
            })
            .collect();
        let generated_at = selections
            .iter()
            .flat_map(|s| s.ranked.iter().map(|r| r.fitted_at))
            .max();
        EvaluationReport {
            generated_at,
            tasks,
            drift: DriftSummary::from_history(drift_history),
        }
    }

    /// Self-contained HTML page; every interpolated string is escaped.
    pub fn render_html(report: &EvaluationReport) -> String {
        let mut html = String::new();
        html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
        html.push_str("<title>Migraine model evaluation</title>\n<style>\n");
        html.push_str(
            "body{font-family:sans-serif;margin:2em}table{border-collapse:collapse;margin-bottom:1.5em}\
             td,th{border:1px solid #ccc;padding:4px 8px;text-align:left}\
             .overfit{color:#b45309}.underfit{color:#b91c1c}.well_fit{color:#15803d}\n",
        );
        html.push_str("</style>\n</head>\n<body>\n<h1>Migraine model evaluation</h1>\n");
        if let Some(at) = report.generated_at {
            let _ = writeln!(html, "<p>Models trained at {}</p>", escape(&at.to_rfc3339()));
        }

        for task in &report.tasks {
            let _ = writeln!(
                html,
                "<h2>{} (primary metric: {})</h2>\n<p>{} candidates evaluated</p>",
                escape(task.task.as_str()),
                escape(&task.primary_metric),
                task.evaluated
            );
            html.push_str("<table>\n<tr><th>Rank</th><th>Candidate</th><th>Train</th><th>Validation</th><th>CV</th><th>Verdict</th><th>Recommendation</th></tr>\n");
            for model in &task.models {
                let cv = model
                    .cv
                    .as_ref()
                    .map(|cv| format!("{:.4} &plusmn; {:.4} ({} folds)", cv.mean, cv.std, cv.folds))
                    .unwrap_or_else(|| "-".to_string());
                let _ = writeln!(
                    html,
                    "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td class=\"{}\">{}</td><td>{}</td></tr>",
                    model.rank,
                    escape(&model.candidate),
                    metric_list(&model.train),
                    metric_list(&model.validation),
                    cv,
                    model.verdict.as_str(),
                    model.verdict.as_str(),
                    escape(&model.recommendation)
                );
            }
            html.push_str("</table>\n");
            if task.models.iter().any(|m| m.confusion.is_some()) {
                html.push_str("<h3>Validation confusion matrices</h3>\n<table>\n");
                html.push_str("<tr><th>Candidate</th><th>TP</th><th>FP</th><th>TN</th><th>FN</th><th>Per class (precision / recall / F1, support)</th></tr>\n");
                for model in &task.models {
                    let Some(c) = &model.confusion else {
                        continue;
                    };
                    let classes = model
                        .classes
                        .iter()
                        .map(|r| {
                            format!(
                                "{}: {:.4} / {:.4} / {:.4} ({})",
                                r.label, r.precision, r.recall, r.f1, r.support
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("<br>");
                    let _ = writeln!(
                        html,
                        "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                        escape(&model.candidate),
                        c.tp,
                        c.fp,
                        c.tn,
                        c.fn_,
                        classes
                    );
                }
                html.push_str("</table>\n");
            }
            if !task.failed.is_empty() {
                html.push_str("<h3>Failed candidates</h3>\n<ul>\n");
                for failed in &task.failed {
                    let _ = writeln!(
                        html,
                        "<li>{}: {}</li>",
                        escape(&failed.candidate),
                        escape(&failed.reason)
                    );
                }
                html.push_str("</ul>\n");
            }
        }

        let drift = &report.drift;
        let _ = writeln!(
            html,
            "<h2>Drift monitoring</h2>\n<p>{} cycles, {} checked, {} skipped, {} alerts</p>",
            drift.cycles, drift.checked, drift.skipped, drift.alerts
        );
        if let Some(rec) = &drift.latest_recommendation {
            let _ = writeln!(html, "<p>Latest: {}</p>", escape(rec));
        }
        html.push_str("</body>\n</html>\n");
        html
    }

    /// Write `evaluation_report.json` and `.html` into `dir`, each atomically.
    pub async fn write_report(report: &EvaluationReport, dir: &Path, io: &IoConfig) -> Result<ReportPaths> {
        let paths = ReportPaths {
            json: dir.join(REPORT_JSON),
            html: dir.join(REPORT_HTML),
        };
        let files = vec![
            (paths.json.clone(), serde_json::to_vec_pretty(report)?),
            (paths.html.clone(), Self::render_html(report).into_bytes()),
        ];
        let dir = dir.to_path_buf();
        with_retry("report.write", io, move || {
            fs::create_dir_all(&dir)?;
            for (path, bytes) in &files {
                write_atomic(&dir, path, bytes)?;
            }
            Ok(())
        })
        .await?;
        Ok(paths)
    }
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| PipelineError::Io(e.error))?;
    Ok(())
}

fn metric_list(values: &BTreeMap<String, f64>) -> String {
    values
        .iter()
        .map(|(k, v)| format!("{}={v:.4}", escape(k)))
        .collect::<Vec<_>>()
        .join("<br>")
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Written instead of a release when a task has too few viable candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingFailureReport {
    pub task: Task,
    pub generated_at: DateTime<Utc>,
    pub error: String,
    pub evaluated: usize,
    pub failed: Vec<FailedCandidate>,
}

impl TrainingFailureReport {
    pub fn new(task: Task, error: &PipelineError, runs: &[ExperimentRun]) -> Self {
        Self {
            task,
            generated_at: Utc::now(),
            error: error.to_string(),
            evaluated: runs.len(),
            failed: runs
                .iter()
                .filter(|r| r.is_failed())
                .map(|r| FailedCandidate {
                    candidate: r.candidate().to_string(),
                    reason: r.failure.clone().unwrap_or_default(),
                })
                .collect(),
        }
    }

    pub fn file_name(task: Task) -> String {
        format!("training_failure_{}.json", task.as_str())
    }
}

pub async fn write_failure_report(report: &TrainingFailureReport, dir: &Path, io: &IoConfig) -> Result<PathBuf> {
    let path = dir.join(TrainingFailureReport::file_name(report.task));
    let bytes = serde_json::to_vec_pretty(report)?;
    let (dir, target) = (dir.to_path_buf(), path.clone());
    with_retry("report.write_failure", io, move || {
        fs::create_dir_all(&dir)?;
        write_atomic(&dir, &target, &bytes)
    })
    .await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Split;
    use crate::drift::DriftReport;
    use crate::selector::select_top;
    use crate::test_support::{fast_io, quick_runs, split_dataset};

    fn drift_report(drift_detected: bool, minute: u32) -> DriftReport {
        DriftReport {
            task: Task::Classification,
            checked_at: DateTime::parse_from_rfc3339(&format!("2026-03-01T10:{minute:02}:00Z"))
                .unwrap()
                .with_timezone(&Utc),
            window_size: 100,
            features: vec![],
            ks_statistic: 0.0,
            ks_p_value: 1.0,
            drifted_features: if drift_detected { vec!["humidity".into()] } else { vec![] },
            target_drift: None,
            performance: None,
            drift_detected,
            recommendation: if drift_detected {
                "Retrain: input distribution shifted for humidity".into()
            } else {
                "No action needed".into()
            },
        }
    }

    #[tokio::test]
    async fn render_is_pure() {
        let data = split_dataset(200, 41);
        let runs = quick_runs(Task::Classification, &data).await;
        let selection = select_top(Task::Classification, &runs, 2).unwrap();
        let history = vec![
            HistoryEntry::Checked {
                report: drift_report(false, 0),
            },
            HistoryEntry::Checked {
                report: drift_report(true, 5),
            },
            HistoryEntry::Skipped {
                task: Task::Classification,
                at: Utc::now(),
                reason: "window has 3 rows".into(),
            },
        ];

        let a = ReportGenerator::render(std::slice::from_ref(&selection), &history);
        let b = ReportGenerator::render(std::slice::from_ref(&selection), &history);
        assert_eq!(a, b);
        assert_eq!(ReportGenerator::render_html(&a), ReportGenerator::render_html(&b));

        let task = &a.tasks[0];
        assert_eq!(task.models.len(), 2);
        assert_eq!(task.models[0].rank, 1);
        assert_eq!(task.models[0].recommendation, selection.ranked[0].diagnosis.recommendation);
        assert_eq!(a.generated_at, selection.ranked.iter().map(|r| r.fitted_at).max());
        assert_eq!(a.drift.cycles, 3);
        assert_eq!(a.drift.skipped, 1);
        assert_eq!(a.drift.alerts, 1);
        assert_eq!(a.drift.latest_drifted_features, vec!["humidity".to_string()]);

        let top = &task.models[0];
        let confusion = top.confusion.expect("classification models carry a confusion matrix");
        assert_eq!(confusion.total(), data.split_indices(Split::Validation).len());
        assert_eq!(top.classes.len(), 2);
        assert_eq!(
            top.classes[0].support + top.classes[1].support,
            confusion.total()
        );
        let html = ReportGenerator::render_html(&a);
        assert!(html.contains("Validation confusion matrices"));
        assert!(html.contains(&format!("<td>{}</td><td>{}</td>", confusion.tp, confusion.fp)));
    }

    #[test]
    fn html_escapes_candidate_text() {
        let report = EvaluationReport {
            generated_at: None,
            tasks: vec![TaskReport {
                task: Task::Regression,
                primary_metric: "r2".into(),
                evaluated: 1,
                models: vec![],
                failed: vec![FailedCandidate {
                    candidate: "<script>".into(),
                    reason: "a & b".into(),
                }],
            }],
            drift: DriftSummary::default(),
        };
        let html = ReportGenerator::render_html(&report);
        assert!(html.contains("&lt;script&gt;: a &amp; b"));
        assert!(!html.contains("<script>"));
    }

    #[tokio::test]
    async fn reports_land_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let report = ReportGenerator::render(&[], &[]);
        let paths = ReportGenerator::write_report(&report, dir.path(), &fast_io())
            .await
            .unwrap();
        let back: EvaluationReport = serde_json::from_slice(&fs::read(&paths.json).unwrap()).unwrap();
        assert_eq!(back, report);
        assert!(fs::read_to_string(&paths.html).unwrap().contains("Drift monitoring"));

        let err = PipelineError::NoViableCandidate {
            task: "regression".into(),
            viable: 0,
            required: 2,
        };
        let failure = TrainingFailureReport::new(Task::Regression, &err, &[]);
        let path = write_failure_report(&failure, dir.path(), &fast_io()).await.unwrap();
        assert!(path.ends_with("training_failure_regression.json"));
        let back: TrainingFailureReport = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert!(back.error.contains("0 viable, 2 required"));
    }
}

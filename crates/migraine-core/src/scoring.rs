//! Metric engine: closed-form classification and regression metrics.

use std::collections::BTreeMap;

use crate::domain::{ConfusionMatrix, MetricSnapshot, PipelineError, Result, Split, Task};

/// Name of the metric candidates are ranked on for `task`.
pub fn primary_metric(task: Task) -> &'static str {
    task.primary_metric()
}

fn check_lengths(y_true: &[f64], y_pred: &[f64]) -> Result<()> {
    if y_true.is_empty() {
        return Err(PipelineError::InvalidInput(
            "metric inputs must be non-empty".to_string(),
        ));
    }
    if y_true.len() != y_pred.len() {
        return Err(PipelineError::InvalidInput(format!(
            "y_true has {} values, y_pred has {}",
            y_true.len(),
            y_pred.len()
        )));
    }
    if y_true.iter().chain(y_pred).any(|v| !v.is_finite()) {
        return Err(PipelineError::InvalidInput(
            "metric inputs must be finite".to_string(),
        ));
    }
    Ok(())
}

fn check_labels(name: &str, values: &[f64]) -> Result<()> {
    if values.iter().any(|v| *v != 0.0 && *v != 1.0) {
        return Err(PipelineError::InvalidInput(format!(
            "{name} must contain only 0/1 labels"
        )));
    }
    Ok(())
}

/// Accuracy, precision, recall and F1 for the positive class, plus ROC-AUC
/// when `y_prob` is given and both classes occur in `y_true`. The confusion
/// counts are attached to the snapshot.
///
/// Precision/recall with a zero denominator are reported as 0.
pub fn compute_classification_metrics(
    split: Split,
    y_true: &[f64],
    y_pred: &[f64],
    y_prob: Option<&[f64]>,
) -> Result<MetricSnapshot> {
    check_lengths(y_true, y_pred)?;
    check_labels("y_true", y_true)?;
    check_labels("y_pred", y_pred)?;

    let confusion = ConfusionMatrix::from_labels(y_true, y_pred);
    let [_, positive] = confusion.class_report();

    let mut values = BTreeMap::new();
    values.insert(
        "accuracy".to_string(),
        (confusion.tp + confusion.tn) as f64 / y_true.len() as f64,
    );
    values.insert("precision".to_string(), positive.precision);
    values.insert("recall".to_string(), positive.recall);
    values.insert("f1".to_string(), positive.f1);

    if let Some(prob) = y_prob {
        check_lengths(y_true, prob)?;
        if let Some(auc) = roc_auc(y_true, prob) {
            values.insert("roc_auc".to_string(), auc);
        }
    }
    Ok(MetricSnapshot::new(split, values).with_confusion(confusion))
}

/// MSE, RMSE, MAE and R². R² may be negative; with a constant `y_true` it is
/// 1 for a perfect fit and 0 otherwise.
pub fn compute_regression_metrics(split: Split, y_true: &[f64], y_pred: &[f64]) -> Result<MetricSnapshot> {
    check_lengths(y_true, y_pred)?;

    let n = y_true.len() as f64;
    let mean = y_true.iter().sum::<f64>() / n;
    let ss_res: f64 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)).sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();
    let mae = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).abs()).sum::<f64>() / n;
    let mse = ss_res / n;

    let r2 = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };

    let mut values = BTreeMap::new();
    values.insert("mse".to_string(), mse);
    values.insert("rmse".to_string(), mse.sqrt());
    values.insert("mae".to_string(), mae);
    values.insert("r2".to_string(), r2);
    Ok(MetricSnapshot::new(split, values))
}

/// Metrics for `task` from predictions (and probabilities for classification).
pub fn compute_metrics(
    task: Task,
    split: Split,
    y_true: &[f64],
    y_pred: &[f64],
    y_prob: Option<&[f64]>,
) -> Result<MetricSnapshot> {
    match task {
        Task::Classification => compute_classification_metrics(split, y_true, y_pred, y_prob),
        Task::Regression => compute_regression_metrics(split, y_true, y_pred),
    }
}

/// Mann-Whitney rank formulation with averaged ranks for ties.
/// `None` unless both classes are present.
fn roc_auc(y_true: &[f64], y_prob: &[f64]) -> Option<f64> {
    let n_pos = y_true.iter().filter(|t| **t == 1.0).count();
    let n_neg = y_true.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..y_prob.len()).collect();
    order.sort_by(|&a, &b| y_prob[a].total_cmp(&y_prob[b]));

    let mut ranks = vec![0.0; order.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && y_prob[order[j + 1]] == y_prob[order[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            ranks[order[k]] = avg;
        }
        i = j + 1;
    }

    let pos_rank_sum: f64 = y_true
        .iter()
        .zip(&ranks)
        .filter(|(t, _)| **t == 1.0)
        .map(|(_, r)| r)
        .sum();
    let n_pos = n_pos as f64;
    Some((pos_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64))
}

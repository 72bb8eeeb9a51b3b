//! Model selection: rank viable runs and publish the top-k.

use crate::artifacts::{ArtifactStore, Release};
use crate::domain::{ExperimentRun, FailedCandidate, PipelineError, Result, SelectionResult, Task};
use crate::drift::{ReferenceDistribution, ReferenceMetric};
use crate::metrics::METRICS;
use crate::obs;

/// A run can be ranked when it did not fail, has a finite validation primary
/// metric and still carries its fitted model.
fn viable_score(run: &ExperimentRun) -> Option<f64> {
    if run.is_failed() || run.model.is_none() {
        return None;
    }
    run.validation_primary().filter(|v| v.is_finite())
}

/// Rank `runs` of `task` by validation primary metric (descending), ties to
/// the earlier catalog position, and keep the first `k`.
///
/// Fewer than `k` viable runs is `NoViableCandidate`; the result is never
/// padded or truncated below `k`.
pub fn select_top(task: Task, runs: &[ExperimentRun], k: usize) -> Result<SelectionResult> {
    if k == 0 {
        return Err(PipelineError::InvalidInput(
            "select_top needs k >= 1".to_string(),
        ));
    }
    let runs: Vec<&ExperimentRun> = runs.iter().filter(|r| r.task() == task).collect();

    let mut viable: Vec<(f64, &ExperimentRun)> = runs
        .iter()
        .filter_map(|run| viable_score(run).map(|score| (score, *run)))
        .collect();
    viable.sort_by(|(a, ra), (b, rb)| {
        b.total_cmp(a)
            .then_with(|| ra.catalog_index.cmp(&rb.catalog_index))
    });

    if viable.len() < k {
        return Err(PipelineError::NoViableCandidate {
            task: task.to_string(),
            viable: viable.len(),
            required: k,
        });
    }

    let failed = runs
        .iter()
        .filter(|r| r.is_failed())
        .map(|r| FailedCandidate {
            candidate: r.candidate().to_string(),
            reason: r.failure.clone().unwrap_or_default(),
        })
        .collect();

    Ok(SelectionResult {
        task,
        primary_metric: task.primary_metric().to_string(),
        evaluated: runs.len(),
        ranked: viable.into_iter().take(k).map(|(_, r)| r.clone()).collect(),
        failed,
    })
}

/// [`select_top`] followed by an atomic publish of the selection and its
/// drift reference. The reference metric is set to the rank-1 validation
/// primary metric. On any error the previously published release stays
/// current.
pub async fn select_and_publish(
    task: Task,
    runs: &[ExperimentRun],
    k: usize,
    store: &ArtifactStore,
    reference: &ReferenceDistribution,
) -> Result<(SelectionResult, Release)> {
    let published = match select_top(task, runs, k) {
        Ok(selection) => {
            let mut reference = reference.clone();
            reference.reference_metric = selection.top().and_then(|top| {
                top.validation_primary().map(|value| ReferenceMetric {
                    name: selection.primary_metric.clone(),
                    value,
                })
            });
            store
                .publish(&selection, &reference)
                .await
                .map(|release| (selection, release))
        }
        Err(e) => Err(e),
    };
    match published {
        Ok((selection, release)) => {
            if let Some(top) = selection.top() {
                obs::emit_selection_published(
                    task.as_str(),
                    &release.release_id,
                    top.candidate(),
                    top.validation_primary().unwrap_or(f64::NAN),
                );
            }
            METRICS.inc_selections_published();
            Ok((selection, release))
        }
        Err(e) => {
            obs::emit_selection_rejected(task.as_str(), &e);
            Err(e)
        }
    }
}

//! Deterministic train/validation assignment and k-fold partitioning.

use std::collections::BTreeMap;

use crate::domain::{FeatureMatrix, PipelineError, Result, Split};
use crate::models::rng::SplitMix64;

/// Group row indices by label when every label is 0/1; `None` otherwise.
fn strata(labels: &[f64]) -> Option<Vec<Vec<usize>>> {
    if labels.iter().any(|v| *v != 0.0 && *v != 1.0) {
        return None;
    }
    let mut groups: BTreeMap<bool, Vec<usize>> = BTreeMap::new();
    for (i, v) in labels.iter().enumerate() {
        groups.entry(*v == 1.0).or_default().push(i);
    }
    Some(groups.into_values().collect())
}

/// Assign a split column: `fraction` of the rows (rounded) go to validation.
///
/// With `stratify` and a 0/1 target, each class contributes proportionally.
/// Both partitions are always non-empty.
pub fn train_validation_split(
    matrix: &FeatureMatrix,
    fraction: f64,
    seed: u64,
    stratify: bool,
) -> Result<FeatureMatrix> {
    let n = matrix.n_rows();
    if n < 2 {
        return Err(PipelineError::InvalidInput(format!(
            "need at least 2 rows to split, got {n}"
        )));
    }
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(PipelineError::InvalidInput(format!(
            "validation fraction must be in (0, 1), got {fraction}"
        )));
    }

    let mut rng = SplitMix64::new(seed);
    let groups = match (&matrix.target, stratify) {
        (Some(target), true) => strata(target).unwrap_or_else(|| vec![(0..n).collect()]),
        _ => vec![(0..n).collect()],
    };

    let mut validation = Vec::new();
    let mut train = Vec::new();
    for mut group in groups {
        rng.shuffle(&mut group);
        let take = (group.len() as f64 * fraction).round() as usize;
        let (val, rest) = group.split_at(take.min(group.len()));
        validation.extend_from_slice(val);
        train.extend_from_slice(rest);
    }

    if validation.is_empty() {
        if let Some(i) = train.pop() {
            validation.push(i);
        }
    } else if train.is_empty() {
        if let Some(i) = validation.pop() {
            train.push(i);
        }
    }

    let mut assignment = vec![Split::Train; n];
    for i in validation {
        assignment[i] = Split::Validation;
    }
    matrix.clone().with_split(assignment)
}

/// Fold index (0..folds) for each of `n` rows, balanced by label when given.
pub fn kfold_assignments(n: usize, labels: Option<&[f64]>, folds: usize, seed: u64) -> Result<Vec<usize>> {
    if folds < 2 || folds > n {
        return Err(PipelineError::InvalidInput(format!(
            "cannot make {folds} folds from {n} rows"
        )));
    }
    let mut rng = SplitMix64::derive(seed, 0xCF);
    let groups = labels
        .and_then(strata)
        .unwrap_or_else(|| vec![(0..n).collect()]);

    let mut assignment = vec![0usize; n];
    let mut next = 0usize;
    for mut group in groups {
        rng.shuffle(&mut group);
        for i in group {
            assignment[i] = next % folds;
            next += 1;
        }
    }
    Ok(assignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FeatureColumn;

    fn matrix(labels: Vec<f64>) -> FeatureMatrix {
        let n = labels.len();
        FeatureMatrix::new(
            vec![FeatureColumn::new("x", (0..n).map(|i| i as f64).collect())],
            Some(labels),
        )
        .unwrap()
    }

    #[test]
    fn eighty_twenty_split_is_deterministic() {
        let labels: Vec<f64> = (0..500).map(|i| (i % 3 == 0) as u8 as f64).collect();
        let m = matrix(labels);
        let a = train_validation_split(&m, 0.2, 42, true).unwrap();
        let b = train_validation_split(&m, 0.2, 42, true).unwrap();
        assert_eq!(a.split, b.split);
        assert_eq!(a.split_indices(Split::Validation).len(), 100);
        assert_eq!(a.split_indices(Split::Train).len(), 400);
    }

    #[test]
    fn stratified_split_preserves_class_ratio() {
        let labels: Vec<f64> = (0..100).map(|i| (i < 30) as u8 as f64).collect();
        let m = train_validation_split(&matrix(labels), 0.2, 1, true).unwrap();
        let val = m.partition(Split::Validation);
        let positives = val.target.unwrap().iter().filter(|v| **v == 1.0).count();
        assert_eq!(positives, 6);
    }

    #[test]
    fn tiny_inputs_keep_both_partitions() {
        let m = train_validation_split(&matrix(vec![0.0, 1.0]), 0.2, 3, true).unwrap();
        assert_eq!(m.split_indices(Split::Validation).len(), 1);
        assert_eq!(m.split_indices(Split::Train).len(), 1);
        assert!(train_validation_split(&matrix(vec![1.0]), 0.2, 3, true).is_err());
    }

    #[test]
    fn continuous_target_falls_back_to_plain_shuffle() {
        let m = train_validation_split(&matrix(vec![1.5, 2.5, 3.5, 4.5, 5.5]), 0.4, 9, true).unwrap();
        assert_eq!(m.split_indices(Split::Validation).len(), 2);
    }

    #[test]
    fn folds_are_balanced() {
        let labels: Vec<f64> = (0..30).map(|i| (i % 2) as f64).collect();
        let folds = kfold_assignments(30, Some(&labels), 3, 42).unwrap();
        for k in 0..3 {
            let members: Vec<usize> = (0..30).filter(|&i| folds[i] == k).collect();
            assert_eq!(members.len(), 10);
            let pos = members.iter().filter(|&&i| labels[i] == 1.0).count();
            assert!((4..=6).contains(&pos));
        }
        assert!(kfold_assignments(2, None, 3, 42).is_err());
    }
}

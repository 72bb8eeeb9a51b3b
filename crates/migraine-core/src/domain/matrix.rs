//! Featurized tabular input handed in by the upstream feature pipeline.
//!
//! Columns are stored column-major as named numeric vectors; estimators work
//! on row-major copies produced by [`FeatureMatrix::rows`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::error::{PipelineError, Result};

/// Which partition a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Validation,
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Split::Train => write!(f, "train"),
            Split::Validation => write!(f, "validation"),
        }
    }
}

/// One named numeric column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub values: Vec<f64>,
}

impl FeatureColumn {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// Ordered named feature columns plus optional target, severity and split columns.
///
/// `target` holds the occurrence label (0/1) for the classification task or a
/// continuous severity for regression. `severity` is carried alongside the
/// occurrence label so [`FeatureMatrix::occurrence_subset`] can derive the
/// regression dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub features: Vec<FeatureColumn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<Vec<Split>>,
}

impl FeatureMatrix {
    /// Build and validate a matrix.
    pub fn new(features: Vec<FeatureColumn>, target: Option<Vec<f64>>) -> Result<Self> {
        let matrix = Self {
            features,
            target,
            severity: None,
            split: None,
        };
        matrix.validate()?;
        Ok(matrix)
    }

    pub fn with_severity(mut self, severity: Vec<f64>) -> Result<Self> {
        self.severity = Some(severity);
        self.validate()?;
        Ok(self)
    }

    pub fn with_split(mut self, split: Vec<Split>) -> Result<Self> {
        self.split = Some(split);
        self.validate()?;
        Ok(self)
    }

    /// Check shape and content: at least one column and one row, unique
    /// column names, equal lengths and finite values everywhere.
    pub fn validate(&self) -> Result<()> {
        let Some(first) = self.features.first() else {
            return Err(PipelineError::InvalidInput(
                "feature matrix has no columns".to_string(),
            ));
        };
        let rows = first.values.len();
        if rows == 0 {
            return Err(PipelineError::InvalidInput(
                "feature matrix has no rows".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for column in &self.features {
            if !seen.insert(column.name.as_str()) {
                return Err(PipelineError::InvalidInput(format!(
                    "duplicate feature column {}",
                    column.name
                )));
            }
            if column.values.len() != rows {
                return Err(PipelineError::InvalidInput(format!(
                    "column {} has {} rows, expected {}",
                    column.name,
                    column.values.len(),
                    rows
                )));
            }
            if let Some(i) = column.values.iter().position(|v| !v.is_finite()) {
                return Err(PipelineError::InvalidInput(format!(
                    "column {} has a non-finite value at row {}",
                    column.name, i
                )));
            }
        }

        for (label, column) in [("target", &self.target), ("severity", &self.severity)] {
            if let Some(values) = column {
                if values.len() != rows {
                    return Err(PipelineError::InvalidInput(format!(
                        "{label} has {} rows, expected {rows}",
                        values.len()
                    )));
                }
                if values.iter().any(|v| !v.is_finite()) {
                    return Err(PipelineError::InvalidInput(format!(
                        "{label} has a non-finite value"
                    )));
                }
            }
        }
        if let Some(split) = &self.split {
            if split.len() != rows {
                return Err(PipelineError::InvalidInput(format!(
                    "split has {} rows, expected {rows}",
                    split.len()
                )));
            }
        }
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.features.first().map(|c| c.values.len()).unwrap_or(0)
    }

    pub fn n_features(&self) -> usize {
        self.features.len()
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.features.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.features
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Row-major copy of the feature values.
    pub fn rows(&self) -> Vec<Vec<f64>> {
        (0..self.n_rows())
            .map(|i| self.features.iter().map(|c| c.values[i]).collect())
            .collect()
    }

    /// Row indices assigned to `split`. Empty when no split is declared.
    pub fn split_indices(&self, split: Split) -> Vec<usize> {
        self.split
            .as_ref()
            .map(|s| {
                s.iter()
                    .enumerate()
                    .filter(|(_, assigned)| **assigned == split)
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// New matrix holding only `indices`, in that order.
    pub fn select_rows(&self, indices: &[usize]) -> FeatureMatrix {
        let pick = |values: &Vec<f64>| indices.iter().map(|&i| values[i]).collect::<Vec<_>>();
        FeatureMatrix {
            features: self
                .features
                .iter()
                .map(|c| FeatureColumn::new(c.name.clone(), pick(&c.values)))
                .collect(),
            target: self.target.as_ref().map(pick),
            severity: self.severity.as_ref().map(pick),
            split: self
                .split
                .as_ref()
                .map(|s| indices.iter().map(|&i| s[i]).collect()),
        }
    }

    /// Rows of `split` as a standalone matrix.
    pub fn partition(&self, split: Split) -> FeatureMatrix {
        self.select_rows(&self.split_indices(split))
    }

    /// Regression dataset: rows whose occurrence label is 1, with the
    /// severity column promoted to target. The split assignment is kept.
    pub fn occurrence_subset(&self) -> Result<FeatureMatrix> {
        let target = self.target.as_ref().ok_or_else(|| {
            PipelineError::InvalidInput("occurrence subset needs a target column".to_string())
        })?;
        let severity = self.severity.as_ref().ok_or_else(|| {
            PipelineError::InvalidInput("occurrence subset needs a severity column".to_string())
        })?;

        let indices: Vec<usize> = target
            .iter()
            .enumerate()
            .filter(|(_, label)| **label == 1.0)
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            return Err(PipelineError::InvalidInput(
                "no rows with occurrence = 1".to_string(),
            ));
        }

        let mut subset = self.select_rows(&indices);
        subset.target = Some(indices.iter().map(|&i| severity[i]).collect());
        subset.severity = None;
        Ok(subset)
    }

    /// Reject a matrix whose column names differ from `expected` (order-sensitive).
    pub fn ensure_features(&self, expected: &[String]) -> Result<()> {
        let actual = self.feature_names();
        if actual.as_slice() != expected {
            return Err(PipelineError::FeatureMismatch {
                expected: expected.to_vec(),
                actual,
            });
        }
        Ok(())
    }
}

/// A single observation presented for prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub names: Vec<String>,
    pub values: Vec<f64>,
}

impl FeatureVector {
    pub fn new(names: Vec<String>, values: Vec<f64>) -> Result<Self> {
        if names.len() != values.len() {
            return Err(PipelineError::InvalidInput(format!(
                "{} names for {} values",
                names.len(),
                values.len()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::InvalidInput(
                "feature vector has a non-finite value".to_string(),
            ));
        }
        Ok(Self { names, values })
    }

    pub fn from_pairs<S: Into<String>>(pairs: impl IntoIterator<Item = (S, f64)>) -> Result<Self> {
        let (names, values): (Vec<String>, Vec<f64>) =
            pairs.into_iter().map(|(n, v)| (n.into(), v)).unzip();
        Self::new(names, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FeatureMatrix {
        FeatureMatrix::new(
            vec![
                FeatureColumn::new("stress_level", vec![3.0, 8.0, 5.0, 9.0]),
                FeatureColumn::new("sleep_hours", vec![7.5, 4.0, 6.0, 5.0]),
            ],
            Some(vec![0.0, 1.0, 0.0, 1.0]),
        )
        .unwrap()
    }

    #[test]
    fn rejects_ragged_columns() {
        let err = FeatureMatrix::new(
            vec![
                FeatureColumn::new("a", vec![1.0, 2.0]),
                FeatureColumn::new("b", vec![1.0]),
            ],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn rejects_empty_and_duplicate_columns() {
        assert!(FeatureMatrix::new(vec![], None).is_err());
        assert!(FeatureMatrix::new(vec![FeatureColumn::new("a", vec![])], None).is_err());
        let dup = FeatureMatrix::new(
            vec![
                FeatureColumn::new("a", vec![1.0]),
                FeatureColumn::new("a", vec![2.0]),
            ],
            None,
        );
        assert!(dup.is_err());
    }

    #[test]
    fn rejects_nan_values() {
        let err = FeatureMatrix::new(vec![FeatureColumn::new("a", vec![f64::NAN])], None);
        assert!(err.is_err());
    }

    #[test]
    fn rows_are_row_major() {
        let m = sample();
        let rows = m.rows();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1], vec![8.0, 4.0]);
    }

    #[test]
    fn partition_follows_split_column() {
        let m = sample()
            .with_split(vec![
                Split::Train,
                Split::Validation,
                Split::Train,
                Split::Train,
            ])
            .unwrap();
        let val = m.partition(Split::Validation);
        assert_eq!(val.n_rows(), 1);
        assert_eq!(val.column("stress_level"), Some(&[8.0][..]));
        assert_eq!(val.target, Some(vec![1.0]));
        assert_eq!(m.partition(Split::Train).n_rows(), 3);
    }

    #[test]
    fn occurrence_subset_promotes_severity() {
        let m = sample().with_severity(vec![0.0, 7.0, 0.0, 4.5]).unwrap();
        let sub = m.occurrence_subset().unwrap();
        assert_eq!(sub.n_rows(), 2);
        assert_eq!(sub.target, Some(vec![7.0, 4.5]));
        assert_eq!(sub.column("sleep_hours"), Some(&[4.0, 5.0][..]));
        assert!(sub.severity.is_none());
    }

    #[test]
    fn feature_order_matters() {
        let m = sample();
        let reversed = vec!["sleep_hours".to_string(), "stress_level".to_string()];
        assert!(matches!(
            m.ensure_features(&reversed),
            Err(PipelineError::FeatureMismatch { .. })
        ));
        assert!(m.ensure_features(&m.feature_names()).is_ok());
    }

    #[test]
    fn serde_shape_is_stable() {
        let m = sample();
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["features"][0]["name"], "stress_level");
        assert!(json.get("split").is_none());
        let back: FeatureMatrix = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }
}

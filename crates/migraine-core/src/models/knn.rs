//! Distance-weighted k-nearest neighbours over standardized inputs.

use serde::{Deserialize, Serialize};

use super::linear::Scaler;
use super::KnnParams;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborsModel {
    pub scaler: Scaler,
    pub points: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
    pub k: usize,
    pub weighted: bool,
}

impl NeighborsModel {
    pub(crate) fn fit(params: &KnnParams, x: &[Vec<f64>], y: &[f64]) -> NeighborsModel {
        let scaler = Scaler::fit(x);
        NeighborsModel {
            points: x.iter().map(|r| scaler.transform(r)).collect(),
            targets: y.to_vec(),
            k: params.k.max(1),
            weighted: params.weighted,
            scaler,
        }
    }

    /// Weighted mean target of the k nearest points: the positive-class
    /// probability for 0/1 targets, the estimate for continuous ones.
    pub fn raw(&self, row: &[f64]) -> f64 {
        let query = self.scaler.transform(row);
        let mut dist: Vec<(f64, usize)> = self
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let d2: f64 = p.iter().zip(&query).map(|(a, b)| (a - b).powi(2)).sum();
                (d2.sqrt(), i)
            })
            .collect();
        let k = self.k.min(dist.len());
        if k == 0 {
            return 0.0;
        }
        // Ties on distance resolve to the earlier training row.
        dist.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let exact: Vec<usize> = dist[..k]
            .iter()
            .filter(|(d, _)| *d == 0.0)
            .map(|(_, i)| *i)
            .collect();
        if self.weighted && !exact.is_empty() {
            return exact.iter().map(|&i| self.targets[i]).sum::<f64>() / exact.len() as f64;
        }

        let (num, den) = dist[..k].iter().fold((0.0, 0.0), |(num, den), (d, i)| {
            let w = if self.weighted { 1.0 / d } else { 1.0 };
            (num + w * self.targets[*i], den + w)
        });
        num / den
    }

    pub fn is_finite(&self) -> bool {
        self.scaler.is_finite() && self.targets.iter().all(|t| t.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_returns_its_target() {
        let x = vec![vec![0.0], vec![1.0], vec![2.0], vec![10.0]];
        let y = vec![1.0, 2.0, 3.0, 40.0];
        let model = NeighborsModel::fit(&KnnParams { k: 3, weighted: true }, &x, &y);
        assert_eq!(model.raw(&[1.0]), 2.0);
    }

    #[test]
    fn uniform_weights_average_neighbours() {
        let x = vec![vec![0.0], vec![1.0], vec![2.0], vec![10.0]];
        let y = vec![1.0, 2.0, 3.0, 40.0];
        let model = NeighborsModel::fit(&KnnParams { k: 3, weighted: false }, &x, &y);
        assert!((model.raw(&[1.2]) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn closer_points_weigh_more() {
        let x = vec![vec![0.0], vec![4.0]];
        let y = vec![0.0, 1.0];
        let model = NeighborsModel::fit(&KnnParams { k: 2, weighted: true }, &x, &y);
        assert!(model.raw(&[3.0]) > 0.5);
    }
}

//! Small numeric helpers shared by estimators, scoring and drift detection.

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(f64::total_cmp);
    out
}

/// Linear-interpolated quantile of an ascending slice, `q` in [0, 1].
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// Inner bin edges splitting `values` into `bins` equal-frequency bins.
///
/// Returns at most `bins - 1` strictly increasing edges; ties in the data
/// collapse coincident edges, so discrete features get fewer bins. The outer
/// bins are open-ended.
pub fn quantile_edges(values: &[f64], bins: usize) -> Vec<f64> {
    let sorted = sorted(values);
    let mut edges: Vec<f64> = (1..bins)
        .map(|i| quantile_sorted(&sorted, i as f64 / bins as f64))
        .filter(|e| e.is_finite())
        .collect();
    edges.dedup_by(|a, b| a == b);
    edges
}

/// Index of the bin holding `value`: bin `i` covers `(edges[i-1], edges[i]]`.
pub fn bin_index(edges: &[f64], value: f64) -> usize {
    edges.partition_point(|e| *e < value)
}

/// Per-bin proportions of `values` under `edges` (`edges.len() + 1` bins).
pub fn bin_proportions(edges: &[f64], values: &[f64]) -> Vec<f64> {
    let mut counts = vec![0usize; edges.len() + 1];
    for v in values {
        counts[bin_index(edges, *v)] += 1;
    }
    let total = values.len().max(1) as f64;
    counts.into_iter().map(|c| c as f64 / total).collect()
}

pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_edges_land_on_deciles() {
        let values: Vec<f64> = (0..=100).map(|i| i as f64 / 10.0).collect();
        let edges = quantile_edges(&values, 10);
        assert_eq!(edges.len(), 9);
        for (i, e) in edges.iter().enumerate() {
            assert!((e - (i + 1) as f64).abs() < 1e-9);
        }
    }

    #[test]
    fn binary_feature_collapses_edges() {
        let values = vec![0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0];
        let edges = quantile_edges(&values, 10);
        assert!(edges.len() <= 2);
        let props = bin_proportions(&edges, &values);
        assert!((props.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn bins_are_right_closed() {
        let edges = [1.0, 2.0];
        assert_eq!(bin_index(&edges, 0.5), 0);
        assert_eq!(bin_index(&edges, 1.0), 0);
        assert_eq!(bin_index(&edges, 1.5), 1);
        assert_eq!(bin_index(&edges, 2.0), 1);
        assert_eq!(bin_index(&edges, 99.0), 2);
    }

    #[test]
    fn population_std() {
        assert!((std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.0).abs() < 1e-12);
        assert_eq!(std_dev(&[]), 0.0);
    }

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert!(sigmoid(-800.0) >= 0.0);
        assert!(sigmoid(800.0) <= 1.0);
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
    }
}

//! CART regression tree grown on first/second-order statistics.
//!
//! Every tree-based estimator reduces to this builder: plain regression trees
//! use `grad = -y, hess = 1` (leaf = mean, gain = variance reduction), the
//! boosters pass loss gradients and hessians, and weighted fits scale both by
//! the sample weight. Leaf value is `-G / (H + lambda)`.

use serde::{Deserialize, Serialize};

use super::rng::SplitMix64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone)]
pub(crate) struct TreeConfig {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Features examined per split; `None` examines all
    pub max_features: Option<usize>,
    pub lambda: f64,
}

/// Per-feature split candidates for histogram search.
pub(crate) type BinEdges = [Vec<f64>];

struct Builder<'a> {
    x: &'a [Vec<f64>],
    grad: &'a [f64],
    hess: &'a [f64],
    cfg: &'a TreeConfig,
    bins: Option<&'a BinEdges>,
    nodes: Vec<Node>,
}

struct Candidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl Tree {
    /// Grow a tree over `rows`.
    pub(crate) fn fit(
        x: &[Vec<f64>],
        grad: &[f64],
        hess: &[f64],
        rows: &[usize],
        cfg: &TreeConfig,
        bins: Option<&BinEdges>,
        rng: &mut SplitMix64,
    ) -> Tree {
        let mut builder = Builder {
            x,
            grad,
            hess,
            cfg,
            bins,
            nodes: Vec::new(),
        };
        builder.grow(rows.to_vec(), 0, rng);
        Tree {
            nodes: builder.nodes,
        }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn is_finite(&self) -> bool {
        self.nodes.iter().all(|n| match n {
            Node::Leaf { value } => value.is_finite(),
            Node::Split { threshold, .. } => threshold.is_finite(),
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

fn score(g: f64, h: f64, lambda: f64) -> f64 {
    let denom = h + lambda;
    if denom <= 0.0 {
        0.0
    } else {
        g * g / denom
    }
}

fn leaf_value(g: f64, h: f64, lambda: f64) -> f64 {
    let denom = h + lambda;
    if denom <= 0.0 {
        0.0
    } else {
        -g / denom
    }
}

impl Builder<'_> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize, rng: &mut SplitMix64) -> usize {
        let (g, h) = rows
            .iter()
            .fold((0.0, 0.0), |(g, h), &r| (g + self.grad[r], h + self.hess[r]));
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: leaf_value(g, h, self.cfg.lambda),
        });

        if depth >= self.cfg.max_depth || rows.len() < 2 * self.cfg.min_samples_leaf.max(1) {
            return idx;
        }

        let Some(best) = self.best_split(&rows, g, h, rng) else {
            return idx;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .copied()
            .partition(|&r| self.x[r][best.feature] <= best.threshold);
        if left.is_empty() || right.is_empty() {
            return idx;
        }

        let l = self.grow(left, depth + 1, rng);
        let r = self.grow(right, depth + 1, rng);
        self.nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: l,
            right: r,
        };
        idx
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64, rng: &mut SplitMix64) -> Option<Candidate> {
        let n_features = self.x.first().map(|r| r.len()).unwrap_or(0);
        let features = match self.cfg.max_features {
            Some(m) if m < n_features => rng.sample_indices(n_features, m.max(1)),
            _ => (0..n_features).collect(),
        };
        let parent = score(g, h, self.cfg.lambda);

        let mut best: Option<Candidate> = None;
        for feature in features {
            let found = match self.bins {
                Some(edges) => self.histogram_split(rows, feature, &edges[feature], g, h, parent),
                None => self.exact_split(rows, feature, g, h, parent),
            };
            if let Some(c) = found {
                if c.gain > 1e-12 && best.as_ref().map_or(true, |b| c.gain > b.gain) {
                    best = Some(c);
                }
            }
        }
        best
    }

    fn exact_split(&self, rows: &[usize], feature: usize, g: f64, h: f64, parent: f64) -> Option<Candidate> {
        let mut sorted: Vec<(f64, f64, f64)> = rows
            .iter()
            .map(|&r| (self.x[r][feature], self.grad[r], self.hess[r]))
            .collect();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        let min_leaf = self.cfg.min_samples_leaf.max(1);
        let n = sorted.len();
        let (mut gl, mut hl) = (0.0, 0.0);
        let mut best: Option<Candidate> = None;
        for i in 0..n - 1 {
            gl += sorted[i].1;
            hl += sorted[i].2;
            let (here, next) = (sorted[i].0, sorted[i + 1].0);
            if here == next {
                continue;
            }
            let nl = i + 1;
            if nl < min_leaf || n - nl < min_leaf {
                continue;
            }
            let gain = score(gl, hl, self.cfg.lambda)
                + score(g - gl, h - hl, self.cfg.lambda)
                - parent;
            if best.as_ref().map_or(true, |b| gain > b.gain) {
                let mid = here + (next - here) / 2.0;
                let threshold = if mid < next { mid } else { here };
                best = Some(Candidate {
                    feature,
                    threshold,
                    gain,
                });
            }
        }
        best
    }

    fn histogram_split(
        &self,
        rows: &[usize],
        feature: usize,
        edges: &[f64],
        g: f64,
        h: f64,
        parent: f64,
    ) -> Option<Candidate> {
        if edges.is_empty() {
            return None;
        }
        let mut buckets = vec![(0.0, 0.0, 0usize); edges.len() + 1];
        for &r in rows {
            let b = crate::stats::bin_index(edges, self.x[r][feature]);
            buckets[b].0 += self.grad[r];
            buckets[b].1 += self.hess[r];
            buckets[b].2 += 1;
        }

        let min_leaf = self.cfg.min_samples_leaf.max(1);
        let (mut gl, mut hl, mut nl) = (0.0, 0.0, 0usize);
        let mut best: Option<Candidate> = None;
        for (b, edge) in edges.iter().enumerate() {
            gl += buckets[b].0;
            hl += buckets[b].1;
            nl += buckets[b].2;
            if nl < min_leaf || rows.len() - nl < min_leaf {
                continue;
            }
            let gain = score(gl, hl, self.cfg.lambda)
                + score(g - gl, h - hl, self.cfg.lambda)
                - parent;
            if best.as_ref().map_or(true, |c| gain > c.gain) {
                best = Some(Candidate {
                    feature,
                    threshold: *edge,
                    gain,
                });
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regression_target(y: &[f64]) -> (Vec<f64>, Vec<f64>) {
        (y.iter().map(|v| -v).collect(), vec![1.0; y.len()])
    }

    fn cfg(depth: usize) -> TreeConfig {
        TreeConfig {
            max_depth: depth,
            min_samples_leaf: 1,
            max_features: None,
            lambda: 0.0,
        }
    }

    #[test]
    fn step_function_is_learned_exactly() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..20).map(|i| if i < 10 { 1.0 } else { 5.0 }).collect();
        let (g, h) = regression_target(&y);
        let rows: Vec<usize> = (0..20).collect();
        let tree = Tree::fit(&x, &g, &h, &rows, &cfg(3), None, &mut SplitMix64::new(0));

        assert_eq!(tree.predict(&[3.0]), 1.0);
        assert_eq!(tree.predict(&[15.0]), 5.0);
        assert_eq!(tree.node_count(), 3);
    }

    #[test]
    fn depth_zero_is_the_mean() {
        let x = vec![vec![0.0], vec![1.0], vec![2.0]];
        let (g, h) = regression_target(&[1.0, 2.0, 6.0]);
        let tree = Tree::fit(&x, &g, &h, &[0, 1, 2], &cfg(0), None, &mut SplitMix64::new(0));
        assert!((tree.predict(&[10.0]) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn histogram_split_uses_bin_edges() {
        let x: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..40).map(|i| if i < 20 { 0.0 } else { 1.0 }).collect();
        let (g, h) = regression_target(&y);
        let rows: Vec<usize> = (0..40).collect();
        let edges = vec![vec![9.5, 19.5, 29.5]];
        let tree = Tree::fit(&x, &g, &h, &rows, &cfg(1), Some(&edges), &mut SplitMix64::new(0));
        assert_eq!(tree.predict(&[19.0]), 0.0);
        assert_eq!(tree.predict(&[20.0]), 1.0);
    }

    #[test]
    fn constant_feature_yields_single_leaf() {
        let x = vec![vec![1.0]; 10];
        let (g, h) = regression_target(&[0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0]);
        let rows: Vec<usize> = (0..10).collect();
        let tree = Tree::fit(&x, &g, &h, &rows, &cfg(4), None, &mut SplitMix64::new(0));
        assert_eq!(tree.node_count(), 1);
        assert!((tree.predict(&[1.0]) - 0.5).abs() < 1e-12);
    }
}

//! Isolation forest.

use rand::Rng;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful BST search over `n` points.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

fn feature(sample: &[f64], index: usize) -> f64 {
    sample.get(index).copied().unwrap_or(0.0)
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn build<R: Rng + ?Sized>(
        rng: &mut R,
        points: &[&[f64]],
        dims: usize,
        depth: usize,
        max_depth: usize,
    ) -> Node {
        if depth >= max_depth || points.len() <= 1 {
            return Node::Leaf { size: points.len() };
        }

        let splittable: Vec<(usize, f64, f64)> = (0..dims)
            .filter_map(|f| {
                let (lo, hi) = points
                    .iter()
                    .map(|p| feature(p, f))
                    .filter(|v| v.is_finite())
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                        (lo.min(v), hi.max(v))
                    });
                // A range wider than f64::MAX cannot be sampled from.
                (hi > lo && (hi - lo).is_finite()).then_some((f, lo, hi))
            })
            .collect();
        if splittable.is_empty() {
            return Node::Leaf { size: points.len() };
        }

        let (feature_index, lo, hi) = splittable[rng.gen_range(0..splittable.len())];
        let threshold = rng.gen_range(lo..hi);
        let (left, right): (Vec<&[f64]>, Vec<&[f64]>) = points
            .iter()
            .copied()
            .partition(|p| feature(p, feature_index) < threshold);

        Node::Split {
            feature: feature_index,
            threshold,
            left: Box::new(Node::build(rng, &left, dims, depth + 1, max_depth)),
            right: Box::new(Node::build(rng, &right, dims, depth + 1, max_depth)),
        }
    }

    fn path_length(&self, sample: &[f64], depth: usize) -> f64 {
        match self {
            Node::Leaf { size } => depth as f64 + average_path_length(*size),
            Node::Split {
                feature: f,
                threshold,
                left,
                right,
            } => {
                if feature(sample, *f) < *threshold {
                    left.path_length(sample, depth + 1)
                } else {
                    right.path_length(sample, depth + 1)
                }
            }
        }
    }
}

/// Ensemble of random isolation trees fitted on subsamples.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<Node>,
    subsample_size: usize,
}

impl IsolationForest {
    /// Fits `n_trees` trees on random subsamples of at most `max_samples`
    /// points. Returns `None` when there is nothing to fit.
    pub fn fit<R: Rng + ?Sized>(
        rng: &mut R,
        samples: &[Vec<f64>],
        n_trees: usize,
        max_samples: usize,
    ) -> Option<Self> {
        if samples.is_empty() || n_trees == 0 {
            return None;
        }
        let dims = samples.iter().map(Vec::len).max().unwrap_or(0);
        let subsample_size = max_samples.clamp(1, samples.len());
        let max_depth = (subsample_size as f64).log2().ceil().max(1.0) as usize;

        let trees = (0..n_trees)
            .map(|_| {
                let points: Vec<&[f64]> =
                    rand::seq::index::sample(rng, samples.len(), subsample_size)
                        .into_iter()
                        .map(|i| samples[i].as_slice())
                        .collect();
                Node::build(rng, &points, dims, 0, max_depth)
            })
            .collect();

        Some(Self {
            trees,
            subsample_size,
        })
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    /// `2^(−E[h(x)] / c(ψ))`: near 1 for easily isolated points, around 0.5
    /// or below for ordinary ones.
    pub fn score(&self, sample: &[f64]) -> f64 {
        let normaliser = average_path_length(self.subsample_size);
        if normaliser == 0.0 || self.trees.is_empty() {
            return 0.5;
        }
        let mean_path = self
            .trees
            .iter()
            .map(|tree| tree.path_length(sample, 0))
            .sum::<f64>()
            / self.trees.len() as f64;
        2f64.powf(-mean_path / normaliser)
    }
}

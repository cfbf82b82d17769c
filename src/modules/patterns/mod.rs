//! Pattern recognition over crawl traffic.
//!
//! Unsupervised tools used to check whether the traffic this crate produces
//! looks unusual: an isolation forest for outliers, k-means for grouping
//! sessions, cosine ranking, feature extraction and bot signatures.

mod features;
mod isolation;
mod kmeans;
mod signatures;
mod similarity;

pub use features::{
    RequestTrace, TrafficFeatures, extract_features, normalize_features, shannon_entropy,
};
pub use isolation::{IsolationForest, average_path_length};
pub use kmeans::{Clustering, kmeans};
pub use signatures::{BotKind, BotSignature, detect_bot_by_pattern, detect_bot_signature};
pub use similarity::{cosine_similarity, rank_by_similarity};

use rand::{SeedableRng, rngs::StdRng};
use serde::Serialize;

use crate::config::PatternConfig;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnomalyScore {
    /// Index of the sample in the input slice.
    pub index: usize,
    pub score: f64,
    pub is_anomaly: bool,
}

#[derive(Debug)]
pub struct PatternRecognizer {
    config: PatternConfig,
    rng: StdRng,
    model: Option<IsolationForest>,
}

impl PatternRecognizer {
    pub fn new(config: PatternConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
            model: None,
        }
    }

    pub fn with_seed(config: PatternConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            model: None,
        }
    }

    pub fn config(&self) -> &PatternConfig {
        &self.config
    }

    pub fn anomaly_threshold(&self) -> f64 {
        1.0 - self.config.contamination
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    /// Fits the model kept for [`score`](Self::score). Returns `false` and
    /// keeps the previous model when fewer than `min_samples` are given.
    pub fn train(&mut self, samples: &[Vec<f64>]) -> bool {
        if samples.len() < self.config.min_samples {
            log::debug!(
                "Not training on {} samples (minimum {})",
                samples.len(),
                self.config.min_samples
            );
            return false;
        }
        self.model = IsolationForest::fit(
            &mut self.rng,
            samples,
            self.config.n_trees,
            self.config.max_samples,
        );
        self.model.is_some()
    }

    /// Anomaly score of `sample` under the trained model.
    pub fn score(&self, sample: &[f64]) -> Option<f64> {
        self.model.as_ref().map(|model| model.score(sample))
    }

    pub fn is_anomaly(&self, sample: &[f64]) -> Option<bool> {
        self.score(sample).map(|score| score > self.anomaly_threshold())
    }

    /// Fits a forest on `samples` and scores each of them. Empty when fewer
    /// than `min_samples` are given.
    pub fn detect_anomalies(&mut self, samples: &[Vec<f64>]) -> Vec<AnomalyScore> {
        if samples.len() < self.config.min_samples {
            return Vec::new();
        }
        let Some(forest) = IsolationForest::fit(
            &mut self.rng,
            samples,
            self.config.n_trees,
            self.config.max_samples,
        ) else {
            return Vec::new();
        };

        let threshold = self.anomaly_threshold();
        let scores: Vec<AnomalyScore> = samples
            .iter()
            .enumerate()
            .map(|(index, sample)| {
                let score = forest.score(sample);
                AnomalyScore {
                    index,
                    score,
                    is_anomaly: score > threshold,
                }
            })
            .collect();

        let flagged = scores.iter().filter(|s| s.is_anomaly).count();
        if flagged > 0 {
            log::info!("{flagged} of {} samples flagged as anomalous", samples.len());
        }
        scores
    }

    pub fn cluster(&mut self, samples: &[Vec<f64>], k: usize) -> Clustering {
        kmeans(
            &mut self.rng,
            samples,
            k,
            self.config.kmeans_max_iterations,
            self.config.kmeans_tolerance,
        )
    }
}

impl Default for PatternRecognizer {
    fn default() -> Self {
        Self::new(PatternConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::spoofing::FingerprintGenerator;
    use rand::Rng;

    fn samples_with_outlier(seed: u64) -> Vec<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut samples: Vec<Vec<f64>> = (0..150)
            .map(|_| {
                vec![
                    rng.gen_range(0.4..0.6),
                    rng.gen_range(0.4..0.6),
                    rng.gen_range(0.4..0.6),
                ]
            })
            .collect();
        samples.push(vec![100.0, 100.0, 100.0]);
        samples
    }

    #[test]
    fn too_few_samples_yield_nothing() {
        let mut recognizer = PatternRecognizer::with_seed(PatternConfig::default(), 1);
        let samples = vec![vec![1.0]; 9];
        assert!(recognizer.detect_anomalies(&samples).is_empty());
        assert!(!recognizer.train(&samples));
        assert_eq!(recognizer.score(&[1.0]), None);
    }

    #[test]
    fn flags_the_outlier_only() {
        let mut recognizer = PatternRecognizer::with_seed(PatternConfig::default(), 6);
        let samples = samples_with_outlier(3);
        let scores = recognizer.detect_anomalies(&samples);
        assert_eq!(scores.len(), samples.len());

        let flagged: Vec<usize> = scores
            .iter()
            .filter(|s| s.is_anomaly)
            .map(|s| s.index)
            .collect();
        assert_eq!(flagged, vec![150]);
        for s in &scores {
            assert_eq!(s.is_anomaly, s.score > 0.9);
        }
    }

    #[test]
    fn trained_model_scores_new_samples() {
        let mut recognizer = PatternRecognizer::with_seed(PatternConfig::default(), 2);
        assert!(recognizer.train(&samples_with_outlier(5)));
        assert!(recognizer.is_trained());
        assert_eq!(recognizer.is_anomaly(&[500.0, 500.0, 500.0]), Some(true));
        assert_eq!(recognizer.is_anomaly(&[0.5, 0.5, 0.5]), Some(false));
    }

    #[test]
    fn clusters_through_recognizer() {
        let mut recognizer = PatternRecognizer::with_seed(PatternConfig::default(), 4);
        let samples = samples_with_outlier(8);
        let clustering = recognizer.cluster(&samples, 3);
        assert_eq!(clustering.centroids.len(), 3);
        assert_eq!(clustering.assignments.len(), samples.len());
    }

    #[test]
    fn generated_identities_do_not_look_like_bots() {
        let mut generator = FingerprintGenerator::with_seed(12);
        for _ in 0..50 {
            let fingerprint = generator.generate();
            let verdict = detect_bot_signature(&fingerprint.user_agent);
            assert!(!verdict.is_bot, "{} flagged", fingerprint.user_agent);
        }
    }
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::modules::rate_limit::RateAlgorithm;

/// Success rate (fraction) under which a profile is banned.
pub const DEFAULT_BAN_THRESHOLD: f64 = 0.5;
/// Uses after which a profile is rotated out of normal selection.
pub const DEFAULT_ROTATION_AFTER: u64 = 100;
pub const DEFAULT_CLEANUP_AFTER_DAYS: u32 = 30;
/// Expected share of anomalies in isolation-forest training data.
pub const DEFAULT_CONTAMINATION: f64 = 0.1;
pub const DEFAULT_REPLAY_CAPACITY: usize = 1000;
pub const DEFAULT_MIN_ADJUSTMENT: f64 = 0.1;
pub const DEFAULT_MAX_ADJUSTMENT: f64 = 2.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config read error: {0}")]
    Io(#[from] std::io::Error),
}

/// Point deductions used by detection-risk assessment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    pub heavy_usage_above: u64,
    pub heavy_usage_points: f64,
    pub moderate_usage_above: u64,
    pub moderate_usage_points: f64,
    pub poor_success_below: f64,
    pub poor_success_points: f64,
    pub fair_success_below: f64,
    pub fair_success_points: f64,
    pub recent_use_hours: f64,
    pub recent_use_points: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            heavy_usage_above: 80,
            heavy_usage_points: 30.0,
            moderate_usage_above: 50,
            moderate_usage_points: 15.0,
            poor_success_below: 70.0,
            poor_success_points: 40.0,
            fair_success_below: 85.0,
            fair_success_points: 20.0,
            recent_use_hours: 1.0,
            recent_use_points: -10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub ban_threshold: f64,
    pub rotation_after: u64,
    pub cleanup_after_days: u32,
    /// Directory holding per-profile browser data; `None` disables artifacts.
    pub artifact_root: Option<PathBuf>,
    pub risk: RiskWeights,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            ban_threshold: DEFAULT_BAN_THRESHOLD,
            rotation_after: DEFAULT_ROTATION_AFTER,
            cleanup_after_days: DEFAULT_CLEANUP_AFTER_DAYS,
            artifact_root: None,
            risk: RiskWeights::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Algorithm used for domains that were never configured explicitly.
    pub default_algorithm: String,
    pub default_capacity: f64,
    pub default_window_secs: f64,
    /// Multiplier applied to the adjustment factor on 429/503.
    pub backoff_factor: f64,
    /// Multiplier applied after `recovery_threshold` consecutive 2xx.
    pub recovery_factor: f64,
    pub recovery_threshold: u32,
    pub min_adjustment: f64,
    pub max_adjustment: f64,
    pub backoff_base_secs: f64,
    pub backoff_growth: f64,
    pub max_backoff_secs: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_algorithm: "token_bucket".into(),
            default_capacity: 10.0,
            default_window_secs: 1.0,
            backoff_factor: 0.5,
            recovery_factor: 1.25,
            recovery_threshold: 5,
            min_adjustment: DEFAULT_MIN_ADJUSTMENT,
            max_adjustment: DEFAULT_MAX_ADJUSTMENT,
            backoff_base_secs: 1.0,
            backoff_growth: 2.0,
            max_backoff_secs: 300.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    pub learning_rate: f64,
    pub discount_factor: f64,
    pub epsilon: f64,
    pub epsilon_decay: f64,
    pub epsilon_min: f64,
    pub replay_capacity: usize,
    /// Buffer size above which every learning step replays a batch.
    pub replay_threshold: usize,
    pub replay_batch: usize,
    pub gamma_shape: f64,
    pub gamma_scale: f64,
    pub fatigue_per_action: f64,
    pub fitts_a: f64,
    pub fitts_b: f64,
    pub fitts_target_width: f64,
    pub reading_wpm: f64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount_factor: 0.9,
            epsilon: 0.1,
            epsilon_decay: 0.995,
            epsilon_min: 0.01,
            replay_capacity: DEFAULT_REPLAY_CAPACITY,
            replay_threshold: 50,
            replay_batch: 5,
            gamma_shape: 2.0,
            gamma_scale: 1.0,
            fatigue_per_action: 0.02,
            fitts_a: 0.1,
            fitts_b: 0.15,
            fitts_target_width: 50.0,
            reading_wpm: 238.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub n_trees: usize,
    pub max_samples: usize,
    pub contamination: f64,
    pub min_samples: usize,
    pub kmeans_max_iterations: usize,
    pub kmeans_tolerance: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_samples: 256,
            contamination: DEFAULT_CONTAMINATION,
            min_samples: 10,
            kmeans_max_iterations: 100,
            kmeans_tolerance: 1e-4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub learning_rate: f64,
    pub discount_factor: f64,
    pub epsilon: f64,
    pub epsilon_decay: f64,
    pub epsilon_min: f64,
    pub learning_rate_decay: f64,
    pub learning_rate_min: f64,
    pub replay_capacity: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount_factor: 0.95,
            epsilon: 0.1,
            epsilon_decay: 0.995,
            epsilon_min: 0.01,
            learning_rate_decay: 0.99,
            learning_rate_min: 0.001,
            replay_capacity: DEFAULT_REPLAY_CAPACITY,
        }
    }
}

/// Aggregated configuration, constructed once at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StealthConfig {
    pub profiles: ProfileConfig,
    pub rate_limit: RateLimitConfig,
    pub behavior: BehaviorConfig,
    pub patterns: PatternConfig,
    pub learning: LearningConfig,
}

impl StealthConfig {
    pub fn builder() -> StealthConfigBuilder {
        StealthConfigBuilder::new()
    }

    /// Parse and validate a JSON document; omitted keys keep their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: StealthConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.profiles;
        unit_interval("profiles.ban_threshold", p.ban_threshold)?;
        if p.rotation_after == 0 {
            return Err(invalid("profiles.rotation_after must be positive"));
        }

        let r = &self.rate_limit;
        r.default_algorithm
            .parse::<RateAlgorithm>()
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        if !(r.default_capacity.is_finite() && r.default_capacity >= 1.0) {
            return Err(invalid("rate_limit.default_capacity must be at least 1"));
        }
        positive("rate_limit.default_window_secs", r.default_window_secs)?;
        if !(r.backoff_factor > 0.0 && r.backoff_factor < 1.0) {
            return Err(invalid("rate_limit.backoff_factor must be in (0, 1)"));
        }
        if r.recovery_factor <= 1.0 {
            return Err(invalid("rate_limit.recovery_factor must exceed 1"));
        }
        if r.recovery_threshold == 0 {
            return Err(invalid("rate_limit.recovery_threshold must be positive"));
        }
        positive("rate_limit.min_adjustment", r.min_adjustment)?;
        if r.max_adjustment < r.min_adjustment {
            return Err(invalid("rate_limit.max_adjustment below min_adjustment"));
        }
        positive("rate_limit.backoff_base_secs", r.backoff_base_secs)?;
        if r.backoff_growth < 1.0 {
            return Err(invalid("rate_limit.backoff_growth must be at least 1"));
        }

        let b = &self.behavior;
        unit_interval("behavior.learning_rate", b.learning_rate)?;
        unit_interval("behavior.discount_factor", b.discount_factor)?;
        unit_interval("behavior.epsilon", b.epsilon)?;
        unit_interval("behavior.epsilon_decay", b.epsilon_decay)?;
        unit_interval("behavior.epsilon_min", b.epsilon_min)?;
        if b.replay_capacity == 0 {
            return Err(invalid("behavior.replay_capacity must be positive"));
        }
        positive("behavior.gamma_shape", b.gamma_shape)?;
        positive("behavior.gamma_scale", b.gamma_scale)?;
        positive("behavior.fitts_target_width", b.fitts_target_width)?;
        positive("behavior.reading_wpm", b.reading_wpm)?;
        non_negative("behavior.fitts_a", b.fitts_a)?;
        non_negative("behavior.fitts_b", b.fitts_b)?;
        non_negative("behavior.fatigue_per_action", b.fatigue_per_action)?;

        let pc = &self.patterns;
        if !(pc.contamination > 0.0 && pc.contamination < 0.5) {
            return Err(invalid("patterns.contamination must be in (0, 0.5)"));
        }
        if pc.n_trees == 0 || pc.max_samples < 2 {
            return Err(invalid("patterns.n_trees and patterns.max_samples too small"));
        }

        let l = &self.learning;
        unit_interval("learning.learning_rate", l.learning_rate)?;
        unit_interval("learning.discount_factor", l.discount_factor)?;
        unit_interval("learning.epsilon", l.epsilon)?;
        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}

fn positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{name} must be positive, got {value}")))
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{name} must be non-negative, got {value}")))
    }
}

fn unit_interval(name: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{name} must be within [0, 1], got {value}")))
    }
}

/// Fluent builder for [`StealthConfig`].
#[derive(Debug, Default)]
pub struct StealthConfigBuilder {
    config: StealthConfig,
}

impl StealthConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(mut self, profiles: ProfileConfig) -> Self {
        self.config.profiles = profiles;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    pub fn with_behavior(mut self, behavior: BehaviorConfig) -> Self {
        self.config.behavior = behavior;
        self
    }

    pub fn with_patterns(mut self, patterns: PatternConfig) -> Self {
        self.config.patterns = patterns;
        self
    }

    pub fn with_learning(mut self, learning: LearningConfig) -> Self {
        self.config.learning = learning;
        self
    }

    pub fn ban_threshold(mut self, threshold: f64) -> Self {
        self.config.profiles.ban_threshold = threshold;
        self
    }

    pub fn rotation_after(mut self, uses: u64) -> Self {
        self.config.profiles.rotation_after = uses;
        self
    }

    pub fn artifact_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.profiles.artifact_root = Some(root.into());
        self
    }

    pub fn default_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.config.rate_limit.default_algorithm = algorithm.into();
        self
    }

    pub fn build(self) -> Result<StealthConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(StealthConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = StealthConfig::from_json_str(
            r#"{ "profiles": { "ban_threshold": 0.4 }, "rate_limit": { "default_algorithm": "leaky_bucket" } }"#,
        )
        .unwrap();
        assert_eq!(config.profiles.ban_threshold, 0.4);
        assert_eq!(config.profiles.rotation_after, DEFAULT_ROTATION_AFTER);
        assert_eq!(config.rate_limit.default_algorithm, "leaky_bucket");
        assert_eq!(config.behavior.replay_capacity, DEFAULT_REPLAY_CAPACITY);
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let err = StealthConfig::builder()
            .default_algorithm("fixed_window")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        assert!(StealthConfig::builder().ban_threshold(1.5).build().is_err());
        assert!(StealthConfig::builder().rotation_after(0).build().is_err());
    }

    #[test]
    fn rejects_negative_motor_timing() {
        let mut config = StealthConfig::default();
        config.behavior.fitts_a = -1.0;
        assert!(config.validate().is_err());

        let mut config = StealthConfig::default();
        config.behavior.fitts_b = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = StealthConfig::default();
        config.behavior.fatigue_per_action = -0.1;
        assert!(config.validate().is_err());

        let mut config = StealthConfig::default();
        config.behavior.fitts_a = 0.0;
        config.behavior.fatigue_per_action = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_fractional_default_capacity() {
        let mut config = StealthConfig::default();
        config.rate_limit.default_capacity = 0.5;
        assert!(config.validate().is_err());
        config.rate_limit.default_capacity = 1.0;
        assert!(config.validate().is_ok());
    }
}

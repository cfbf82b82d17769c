//! Settings and configuration module
//!
//! Provides unified configuration with:
//! - Builder pattern
//! - JSON loading (one flat option map per component)
//! - Named defaults for every threshold
//! - Validation before any component is constructed

pub mod settings;

pub use settings::{
    BehaviorConfig, ConfigError, LearningConfig, PatternConfig, ProfileConfig, RateLimitConfig,
    RiskWeights, StealthConfig, StealthConfigBuilder,
};

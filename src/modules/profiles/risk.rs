use serde::Serialize;
use std::fmt;

use super::Profile;
use crate::config::RiskWeights;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
    Unknown,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score > 70.0 {
            RiskLevel::Critical
        } else if score > 50.0 {
            RiskLevel::High
        } else if score > 30.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
            RiskLevel::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskReasons {
    pub usage_count: u64,
    pub success_rate: f64,
    pub hours_since_use: f64,
}

/// Score in `0..=100` with the inputs that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRisk {
    pub score: f64,
    pub level: RiskLevel,
    pub reasons: Option<RiskReasons>,
    pub recommendations: Vec<String>,
}

impl DetectionRisk {
    pub fn unknown() -> Self {
        Self {
            score: 0.0,
            level: RiskLevel::Unknown,
            reasons: None,
            recommendations: Vec::new(),
        }
    }

    pub fn assess(profile: &Profile, hours_since_use: f64, weights: &RiskWeights) -> Self {
        let mut score = 0.0;

        if profile.usage_count > weights.heavy_usage_above {
            score += weights.heavy_usage_points;
        } else if profile.usage_count > weights.moderate_usage_above {
            score += weights.moderate_usage_points;
        }

        if profile.success_rate < weights.poor_success_below {
            score += weights.poor_success_points;
        } else if profile.success_rate < weights.fair_success_below {
            score += weights.fair_success_points;
        }

        if hours_since_use < weights.recent_use_hours {
            score += weights.recent_use_points;
        }

        let score = f64::clamp(score, 0.0, 100.0);

        let mut recommendations = Vec::new();
        if score > 50.0 {
            recommendations.push("Rotate fingerprint immediately".to_string());
            recommendations.push("Use longer delays between requests".to_string());
        }
        if profile.success_rate < weights.poor_success_below {
            recommendations.push("Consider retiring this profile".to_string());
        }

        Self {
            score,
            level: RiskLevel::from_score(score),
            reasons: Some(RiskReasons {
                usage_count: profile.usage_count,
                success_rate: profile.success_rate,
                hours_since_use,
            }),
            recommendations,
        }
    }
}

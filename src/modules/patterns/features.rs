//! Traffic features for a crawl session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::modules::clock::seconds_between;

/// Upper bounds used by [`normalize_features`]; values at or above the bound
/// map to 1.0.
pub const REQUEST_RATE_CEILING: f64 = 10.0;
pub const SESSION_DURATION_CEILING_SECS: f64 = 3600.0;
pub const PAGE_VIEWS_CEILING: f64 = 100.0;
pub const UNIQUE_PATHS_CEILING: f64 = 100.0;
pub const ENTROPY_CEILING_BITS: f64 = 8.0;

/// Raw record of what a session did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestTrace {
    pub timestamps: Vec<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub page_views: Vec<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficFeatures {
    /// Requests per second between the first and last timestamp.
    pub request_rate: f64,
    pub session_duration_secs: f64,
    pub page_views: f64,
    pub unique_paths: f64,
    /// Shannon entropy of the user agent, in bits per character.
    pub user_agent_entropy: f64,
}

impl TrafficFeatures {
    pub const NAMES: [&'static str; 5] = [
        "request_rate",
        "session_duration",
        "page_views",
        "unique_paths",
        "user_agent_entropy",
    ];

    pub fn to_vec(&self) -> Vec<f64> {
        vec![
            self.request_rate,
            self.session_duration_secs,
            self.page_views,
            self.unique_paths,
            self.user_agent_entropy,
        ]
    }
}

pub fn shannon_entropy(text: &str) -> f64 {
    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in text.chars() {
        *counts.entry(c).or_default() += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    counts
        .values()
        .map(|&n| {
            let p = n as f64 / total;
            -p * p.log2()
        })
        .sum()
}

pub fn extract_features(trace: &RequestTrace) -> TrafficFeatures {
    let first = trace.timestamps.iter().min().copied();
    let last = trace.timestamps.iter().max().copied();

    let request_rate = match (first, last) {
        (Some(first), Some(last)) if trace.timestamps.len() > 1 => {
            let span = seconds_between(first, last);
            if span > 0.0 {
                (trace.timestamps.len() - 1) as f64 / span
            } else {
                0.0
            }
        }
        _ => 0.0,
    };

    let session_duration_secs = match (trace.started_at.or(first), trace.ended_at.or(last)) {
        (Some(start), Some(end)) => seconds_between(start, end),
        _ => 0.0,
    };

    let unique_paths = trace.page_views.iter().collect::<HashSet<_>>().len();

    TrafficFeatures {
        request_rate,
        session_duration_secs,
        page_views: trace.page_views.len() as f64,
        unique_paths: unique_paths as f64,
        user_agent_entropy: trace.user_agent.as_deref().map(shannon_entropy).unwrap_or(0.0),
    }
}

/// Scales every feature into `[0, 1]` against fixed ceilings.
pub fn normalize_features(features: &TrafficFeatures) -> Vec<f64> {
    let scale = |value: f64, ceiling: f64| (value / ceiling).clamp(0.0, 1.0);
    vec![
        scale(features.request_rate, REQUEST_RATE_CEILING),
        scale(features.session_duration_secs, SESSION_DURATION_CEILING_SECS),
        scale(features.page_views, PAGE_VIEWS_CEILING),
        scale(features.unique_paths, UNIQUE_PATHS_CEILING),
        scale(features.user_agent_entropy, ENTROPY_CEILING_BITS),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn request_rate_and_duration() {
        let trace = RequestTrace {
            timestamps: (1000..1005).map(at).collect(),
            ..RequestTrace::default()
        };
        let features = extract_features(&trace);
        assert!((features.request_rate - 1.0).abs() < 1e-9);
        assert_eq!(features.session_duration_secs, 4.0);

        let explicit = RequestTrace {
            started_at: Some(at(1000)),
            ended_at: Some(at(1300)),
            ..RequestTrace::default()
        };
        assert_eq!(extract_features(&explicit).session_duration_secs, 300.0);
    }

    #[test]
    fn page_view_counts() {
        let trace = RequestTrace {
            page_views: ["/p1", "/p2", "/p1", "/p3", "/p2"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            ..RequestTrace::default()
        };
        let features = extract_features(&trace);
        assert_eq!(features.page_views, 5.0);
        assert_eq!(features.unique_paths, 3.0);
        assert_eq!(features.request_rate, 0.0);
    }

    #[test]
    fn entropy() {
        assert_eq!(shannon_entropy(""), 0.0);
        assert_eq!(shannon_entropy("aaaa"), 0.0);
        assert!((shannon_entropy("abab") - 1.0).abs() < 1e-12);
        let trace = RequestTrace {
            user_agent: Some("Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0.0.0".into()),
            ..RequestTrace::default()
        };
        assert!(extract_features(&trace).user_agent_entropy > 3.0);
    }

    #[test]
    fn normalised_values_stay_in_unit_range() {
        let features = TrafficFeatures {
            request_rate: 100.0,
            session_duration_secs: 1800.0,
            page_views: 500.0,
            unique_paths: 0.0,
            user_agent_entropy: 4.0,
        };
        let normalised = normalize_features(&features);
        assert_eq!(normalised, vec![1.0, 0.5, 1.0, 0.0, 0.5]);
        assert_eq!(normalised.len(), TrafficFeatures::NAMES.len());
    }
}

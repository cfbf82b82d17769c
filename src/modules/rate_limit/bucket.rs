use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::RateLimitError;
use crate::modules::clock::{chrono_duration, seconds_between};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateAlgorithm {
    TokenBucket,
    LeakyBucket,
    SlidingWindow,
}

impl RateAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateAlgorithm::TokenBucket => "token_bucket",
            RateAlgorithm::LeakyBucket => "leaky_bucket",
            RateAlgorithm::SlidingWindow => "sliding_window",
        }
    }
}

impl fmt::Display for RateAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RateAlgorithm {
    type Err = RateLimitError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "token_bucket" => Ok(RateAlgorithm::TokenBucket),
            "leaky_bucket" => Ok(RateAlgorithm::LeakyBucket),
            "sliding_window" => Ok(RateAlgorithm::SlidingWindow),
            other => Err(RateLimitError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Requested limit for one domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitSpec {
    /// Max requests per window (token capacity, queue size, or log length).
    pub capacity: f64,
    pub window_secs: f64,
    pub algorithm: RateAlgorithm,
    /// Refill/leak rate per second; defaults to `capacity / window_secs`.
    pub rate: Option<f64>,
    /// Extra tokens the refill may accumulate above `capacity`.
    pub burst: f64,
}

impl LimitSpec {
    pub fn new(capacity: f64, window_secs: f64, algorithm: RateAlgorithm) -> Self {
        Self {
            capacity,
            window_secs,
            algorithm,
            rate: None,
            burst: 0.0,
        }
    }

    pub fn token_bucket(capacity: f64, window_secs: f64) -> Self {
        Self::new(capacity, window_secs, RateAlgorithm::TokenBucket)
    }

    pub fn leaky_bucket(capacity: f64, window_secs: f64) -> Self {
        Self::new(capacity, window_secs, RateAlgorithm::LeakyBucket)
    }

    pub fn sliding_window(capacity: f64, window_secs: f64) -> Self {
        Self::new(capacity, window_secs, RateAlgorithm::SlidingWindow)
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn with_burst(mut self, burst: f64) -> Self {
        self.burst = burst;
        self
    }

    pub fn validate(&self) -> Result<(), RateLimitError> {
        // A bucket below one request never admits anything.
        if !(self.capacity.is_finite() && self.capacity >= 1.0) {
            return Err(RateLimitError::InvalidCapacity(self.capacity));
        }
        if !(self.window_secs.is_finite() && self.window_secs > 0.0) {
            return Err(RateLimitError::InvalidWindow(self.window_secs));
        }
        if let Some(rate) = self.rate
            && !(rate.is_finite() && rate > 0.0)
        {
            return Err(RateLimitError::InvalidRate(rate));
        }
        if !(self.burst.is_finite() && self.burst >= 0.0) {
            return Err(RateLimitError::InvalidBurst(self.burst));
        }
        Ok(())
    }

    pub fn base_rate(&self) -> f64 {
        self.rate.unwrap_or(self.capacity / self.window_secs)
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    pub allowed: bool,
    /// Time until the next slot frees up; zero when allowed.
    pub wait: Duration,
}

impl Admission {
    fn allowed() -> Self {
        Self {
            allowed: true,
            wait: Duration::ZERO,
        }
    }

    fn denied(wait_secs: f64) -> Self {
        Self {
            allowed: false,
            wait: Duration::from_secs_f64(wait_secs.max(0.0)),
        }
    }
}

/// Serializable state of one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSnapshot {
    pub domain: String,
    pub algorithm: RateAlgorithm,
    pub capacity: f64,
    pub window_secs: f64,
    pub base_rate: f64,
    pub burst: f64,
    pub level: f64,
    pub last_update: DateTime<Utc>,
    pub adjustment: f64,
    pub success_streak: u32,
    pub failure_streak: u32,
    pub log: Vec<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub(crate) struct Bucket {
    pub(crate) algorithm: RateAlgorithm,
    pub(crate) capacity: f64,
    pub(crate) window_secs: f64,
    pub(crate) base_rate: f64,
    pub(crate) burst: f64,
    /// Tokens for token buckets, queued requests for leaky buckets.
    pub(crate) level: f64,
    pub(crate) last_update: DateTime<Utc>,
    pub(crate) adjustment: f64,
    pub(crate) success_streak: u32,
    pub(crate) failure_streak: u32,
    pub(crate) log: VecDeque<DateTime<Utc>>,
}

impl Bucket {
    pub(crate) fn new(spec: &LimitSpec, now: DateTime<Utc>) -> Self {
        let level = match spec.algorithm {
            RateAlgorithm::TokenBucket => spec.capacity,
            RateAlgorithm::LeakyBucket | RateAlgorithm::SlidingWindow => 0.0,
        };
        Self {
            algorithm: spec.algorithm,
            capacity: spec.capacity,
            window_secs: spec.window_secs,
            base_rate: spec.base_rate(),
            burst: spec.burst,
            level,
            last_update: now,
            adjustment: 1.0,
            success_streak: 0,
            failure_streak: 0,
            log: VecDeque::new(),
        }
    }

    pub(crate) fn effective_rate(&self) -> f64 {
        self.base_rate * self.adjustment
    }

    fn ceiling(&self) -> f64 {
        self.capacity + self.burst
    }

    /// Applies refill, leak or pruning up to `now`. Never moves backwards.
    pub(crate) fn advance(&mut self, now: DateTime<Utc>) {
        let elapsed = seconds_between(self.last_update, now);
        match self.algorithm {
            RateAlgorithm::TokenBucket => {
                self.level = (self.level + elapsed * self.effective_rate()).min(self.ceiling());
            }
            RateAlgorithm::LeakyBucket => {
                self.level = (self.level - elapsed * self.effective_rate()).max(0.0);
            }
            RateAlgorithm::SlidingWindow => {
                let horizon = now - chrono_duration(Duration::from_secs_f64(self.window_secs));
                while let Some(front) = self.log.front().copied() {
                    if front <= horizon {
                        self.log.pop_front();
                    } else {
                        break;
                    }
                }
            }
        }
        if now > self.last_update {
            self.last_update = now;
        }
    }

    pub(crate) fn try_acquire(&mut self, now: DateTime<Utc>) -> Admission {
        self.advance(now);
        match self.algorithm {
            RateAlgorithm::TokenBucket if self.level >= 1.0 => {
                self.level -= 1.0;
                Admission::allowed()
            }
            RateAlgorithm::LeakyBucket if self.level + 1.0 <= self.capacity => {
                self.level += 1.0;
                Admission::allowed()
            }
            RateAlgorithm::SlidingWindow if (self.log.len() as f64) < self.capacity => {
                self.log.push_back(now);
                Admission::allowed()
            }
            _ => Admission::denied(self.wait_secs(now)),
        }
    }

    /// Seconds until the next request would be admitted. Assumes `advance`
    /// already ran for `now`.
    pub(crate) fn wait_secs(&self, now: DateTime<Utc>) -> f64 {
        let rate = self.effective_rate();
        match self.algorithm {
            RateAlgorithm::TokenBucket => {
                if self.level >= 1.0 {
                    0.0
                } else {
                    (1.0 - self.level) / rate
                }
            }
            RateAlgorithm::LeakyBucket => {
                let excess = self.level + 1.0 - self.capacity;
                if excess <= 0.0 { 0.0 } else { excess / rate }
            }
            RateAlgorithm::SlidingWindow => {
                if (self.log.len() as f64) < self.capacity {
                    return 0.0;
                }
                // The slot opens once the oldest entry that keeps the log full expires.
                let surplus = self.log.len() - (self.capacity.ceil() as usize).max(1);
                match self.log.get(surplus) {
                    Some(oldest) => {
                        let expires =
                            *oldest + chrono_duration(Duration::from_secs_f64(self.window_secs));
                        seconds_between(now, expires)
                    }
                    None => 0.0,
                }
            }
        }
    }

    pub(crate) fn snapshot(&self, domain: &str) -> BucketSnapshot {
        BucketSnapshot {
            domain: domain.to_string(),
            algorithm: self.algorithm,
            capacity: self.capacity,
            window_secs: self.window_secs,
            base_rate: self.base_rate,
            burst: self.burst,
            level: self.level,
            last_update: self.last_update,
            adjustment: self.adjustment,
            success_streak: self.success_streak,
            failure_streak: self.failure_streak,
            log: self.log.iter().copied().collect(),
        }
    }

    pub(crate) fn from_snapshot(snapshot: &BucketSnapshot) -> Self {
        Self {
            algorithm: snapshot.algorithm,
            capacity: snapshot.capacity,
            window_secs: snapshot.window_secs,
            base_rate: snapshot.base_rate,
            burst: snapshot.burst,
            level: snapshot.level,
            last_update: snapshot.last_update,
            adjustment: snapshot.adjustment,
            success_streak: snapshot.success_streak,
            failure_streak: snapshot.failure_streak,
            log: snapshot.log.iter().copied().collect(),
        }
    }
}

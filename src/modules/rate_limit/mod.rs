//! Adaptive per-domain rate limiting.
//!
//! Each domain owns one bucket running a token-bucket, leaky-bucket or
//! sliding-window algorithm. Response codes feed back into a per-domain
//! adjustment factor: throttling responses halve the effective rate and
//! streaks of successes slowly restore it.

mod bucket;

pub use bucket::{Admission, BucketSnapshot, LimitSpec, RateAlgorithm};

use bucket::Bucket;
use chrono::{DateTime, Utc};
use http::StatusCode;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::RateLimitConfig;
use crate::modules::clock::{SharedClock, system_clock};
use crate::modules::events::{EventDispatcher, RateChangeEvent, StealthEvent};

#[derive(Debug, Error, PartialEq)]
pub enum RateLimitError {
    #[error("domain must not be empty")]
    EmptyDomain,
    #[error("invalid domain: {0}")]
    InvalidDomain(String),
    #[error("capacity must be at least one request, got {0}")]
    InvalidCapacity(f64),
    #[error("window must be positive, got {0} seconds")]
    InvalidWindow(f64),
    #[error("rate must be positive, got {0}")]
    InvalidRate(f64),
    #[error("burst must not be negative, got {0}")]
    InvalidBurst(f64),
    #[error("unknown rate limiting algorithm: {0}")]
    UnknownAlgorithm(String),
}

/// How a response status feeds the adjustment factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Throttled,
    Success,
    Other,
}

impl ResponseClass {
    pub fn from_status(status: u16) -> Self {
        match StatusCode::from_u16(status) {
            Ok(StatusCode::TOO_MANY_REQUESTS) | Ok(StatusCode::SERVICE_UNAVAILABLE) => {
                ResponseClass::Throttled
            }
            Ok(code) if code.is_success() => ResponseClass::Success,
            _ => ResponseClass::Other,
        }
    }
}

/// Accepts bare hosts or full URLs; returns the lowercase host.
pub fn normalize_domain(raw: &str) -> Result<String, RateLimitError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RateLimitError::EmptyDomain);
    }
    if trimmed.contains("://") {
        let url = Url::parse(trimmed)
            .map_err(|err| RateLimitError::InvalidDomain(format!("{trimmed}: {err}")))?;
        return url
            .host_str()
            .map(|host| host.to_ascii_lowercase())
            .ok_or_else(|| RateLimitError::InvalidDomain(trimmed.to_string()));
    }
    Ok(trimmed.trim_end_matches('.').to_ascii_lowercase())
}

type SharedBucket = Arc<Mutex<Bucket>>;

/// Thread-safe limiter shared by every crawl worker.
#[derive(Debug, Clone)]
pub struct AdaptiveRateLimiter {
    buckets: Arc<RwLock<HashMap<String, SharedBucket>>>,
    config: RateLimitConfig,
    default_algorithm: RateAlgorithm,
    clock: SharedClock,
    events: EventDispatcher,
}

impl AdaptiveRateLimiter {
    /// Builds a limiter, falling back to the token bucket when the default
    /// algorithm name is unknown. Use [`AdaptiveRateLimiter::try_new`] to
    /// reject such a configuration instead.
    pub fn new(config: RateLimitConfig) -> Self {
        let default_algorithm = match config.default_algorithm.parse() {
            Ok(algorithm) => algorithm,
            Err(err) => {
                log::warn!("{err}; falling back to {}", RateAlgorithm::TokenBucket);
                RateAlgorithm::TokenBucket
            }
        };
        Self::with_algorithm(config, default_algorithm)
    }

    pub fn try_new(config: RateLimitConfig) -> Result<Self, RateLimitError> {
        let default_algorithm = config.default_algorithm.parse()?;
        if !(config.default_capacity.is_finite() && config.default_capacity >= 1.0) {
            return Err(RateLimitError::InvalidCapacity(config.default_capacity));
        }
        Ok(Self::with_algorithm(config, default_algorithm))
    }

    fn with_algorithm(config: RateLimitConfig, default_algorithm: RateAlgorithm) -> Self {
        Self {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            config,
            default_algorithm,
            clock: system_clock(),
            events: EventDispatcher::new(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Installs (or replaces) the limit for `domain`.
    pub fn set_limit(&self, domain: &str, spec: LimitSpec) -> Result<(), RateLimitError> {
        spec.validate()?;
        let domain = normalize_domain(domain)?;
        let bucket = Bucket::new(&spec, self.clock.now());
        log::debug!(
            "Rate limit for {domain}: {} req / {}s via {} (rate {:.3}/s, burst {})",
            spec.capacity,
            spec.window_secs,
            spec.algorithm,
            spec.base_rate(),
            spec.burst
        );
        self.buckets
            .write()
            .expect("rate limiter lock poisoned")
            .insert(domain, Arc::new(Mutex::new(bucket)));
        Ok(())
    }

    /// Same as [`set_limit`](Self::set_limit) with the algorithm given by name.
    pub fn set_limit_named(
        &self,
        domain: &str,
        capacity: f64,
        window_secs: f64,
        algorithm: &str,
    ) -> Result<(), RateLimitError> {
        let algorithm = algorithm.parse()?;
        self.set_limit(domain, LimitSpec::new(capacity, window_secs, algorithm))
    }

    fn default_spec(&self) -> LimitSpec {
        LimitSpec::new(
            self.config.default_capacity,
            self.config.default_window_secs,
            self.default_algorithm,
        )
    }

    fn bucket(&self, domain: &str) -> SharedBucket {
        if let Some(bucket) = self
            .buckets
            .read()
            .expect("rate limiter lock poisoned")
            .get(domain)
        {
            return bucket.clone();
        }

        let mut guard = self.buckets.write().expect("rate limiter lock poisoned");
        guard
            .entry(domain.to_string())
            .or_insert_with(|| {
                log::debug!("Creating default rate limit bucket for {domain}");
                Arc::new(Mutex::new(Bucket::new(&self.default_spec(), self.clock.now())))
            })
            .clone()
    }

    fn existing(&self, domain: &str) -> Option<SharedBucket> {
        let domain = normalize_domain(domain).ok()?;
        self.buckets
            .read()
            .expect("rate limiter lock poisoned")
            .get(&domain)
            .cloned()
    }

    fn inspect<T>(&self, domain: &str, f: impl FnOnce(&Bucket) -> T) -> Option<T> {
        let bucket = self.existing(domain)?;
        let mut guard = bucket.lock().expect("bucket lock poisoned");
        guard.advance(self.clock.now());
        Some(f(&guard))
    }

    /// Checks and, when allowed, consumes one slot atomically.
    pub fn check(&self, domain: &str) -> Result<Admission, RateLimitError> {
        let domain = normalize_domain(domain)?;
        let bucket = self.bucket(&domain);
        let admission = bucket
            .lock()
            .expect("bucket lock poisoned")
            .try_acquire(self.clock.now());
        if !admission.allowed {
            log::debug!(
                "Request to {domain} denied, next slot in {:.3}s",
                admission.wait.as_secs_f64()
            );
        }
        Ok(admission)
    }

    pub fn allow_request(&self, domain: &str) -> Result<bool, RateLimitError> {
        self.check(domain).map(|admission| admission.allowed)
    }

    /// Time until the next request would be admitted, without consuming.
    pub fn wait_time(&self, domain: &str) -> Result<Duration, RateLimitError> {
        let domain = normalize_domain(domain)?;
        let bucket = self.bucket(&domain);
        let mut guard = bucket.lock().expect("bucket lock poisoned");
        let now = self.clock.now();
        guard.advance(now);
        Ok(Duration::from_secs_f64(guard.wait_secs(now)))
    }

    /// Feeds a response status into the domain's adjustment factor and
    /// returns the resulting factor.
    pub fn record_response(&self, domain: &str, status: u16) -> Result<f64, RateLimitError> {
        self.record(domain, ResponseClass::from_status(status), Some(status))
    }

    /// Records an attempt that produced no response (timeout, cancellation).
    /// It breaks the success streak without reducing the rate.
    pub fn record_failure(&self, domain: &str) -> Result<f64, RateLimitError> {
        self.record(domain, ResponseClass::Other, None)
    }

    fn record(
        &self,
        domain: &str,
        class: ResponseClass,
        status: Option<u16>,
    ) -> Result<f64, RateLimitError> {
        let domain = normalize_domain(domain)?;
        let bucket = self.bucket(&domain);
        let now = self.clock.now();

        let (before, after) = {
            let mut guard = bucket.lock().expect("bucket lock poisoned");
            // Settle elapsed time at the old rate first.
            guard.advance(now);
            let before = guard.adjustment;
            match class {
                ResponseClass::Throttled => {
                    guard.adjustment = (guard.adjustment * self.config.backoff_factor)
                        .clamp(self.config.min_adjustment, self.config.max_adjustment);
                    guard.failure_streak = guard.failure_streak.saturating_add(1);
                    guard.success_streak = 0;
                }
                ResponseClass::Success => {
                    guard.success_streak = guard.success_streak.saturating_add(1);
                    guard.failure_streak = 0;
                    if guard.success_streak % self.config.recovery_threshold.max(1) == 0 {
                        guard.adjustment = (guard.adjustment * self.config.recovery_factor)
                            .clamp(self.config.min_adjustment, self.config.max_adjustment);
                    }
                }
                ResponseClass::Other => {
                    guard.success_streak = 0;
                }
            }
            (before, guard.adjustment)
        };

        if class == ResponseClass::Throttled {
            self.events.dispatch(StealthEvent::RateReduced(RateChangeEvent {
                domain: domain.clone(),
                status,
                adjustment_factor: after,
                timestamp: now,
            }));
        } else if after > before {
            self.events.dispatch(StealthEvent::RateRecovered(RateChangeEvent {
                domain: domain.clone(),
                status,
                adjustment_factor: after,
                timestamp: now,
            }));
        }
        Ok(after)
    }

    /// `base × growth^attempt`, stretched by the domain's failure streak and
    /// capped at the configured maximum.
    pub fn calculate_backoff(&self, domain: &str, attempt: u32) -> Duration {
        let streak = self
            .existing(domain)
            .map(|bucket| bucket.lock().expect("bucket lock poisoned").failure_streak)
            .unwrap_or(0);
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.config.backoff_base_secs
            * self.config.backoff_growth.powi(exponent)
            * (1.0 + 0.5 * f64::from(streak));
        let capped = if raw.is_finite() {
            raw.min(self.config.max_backoff_secs)
        } else {
            self.config.max_backoff_secs
        };
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Lazily processes refill/leak/pruning for `domain` up to `instant`.
    pub fn advance_to(&self, domain: &str, instant: DateTime<Utc>) {
        if let Some(bucket) = self.existing(domain) {
            bucket.lock().expect("bucket lock poisoned").advance(instant);
        }
    }

    pub fn tokens(&self, domain: &str) -> Option<f64> {
        self.inspect(domain, |bucket| {
            (bucket.algorithm == RateAlgorithm::TokenBucket).then_some(bucket.level)
        })
        .flatten()
    }

    /// Queued requests (leaky bucket) or logged requests (sliding window).
    pub fn queue_size(&self, domain: &str) -> Option<f64> {
        self.inspect(domain, |bucket| match bucket.algorithm {
            RateAlgorithm::LeakyBucket => Some(bucket.level),
            RateAlgorithm::SlidingWindow => Some(bucket.log.len() as f64),
            RateAlgorithm::TokenBucket => None,
        })
        .flatten()
    }

    pub fn effective_rate(&self, domain: &str) -> Option<f64> {
        self.inspect(domain, Bucket::effective_rate)
    }

    pub fn adjustment_factor(&self, domain: &str) -> Option<f64> {
        self.inspect(domain, |bucket| bucket.adjustment)
    }

    pub fn algorithm(&self, domain: &str) -> Option<RateAlgorithm> {
        self.inspect(domain, |bucket| bucket.algorithm)
    }

    pub fn failure_streak(&self, domain: &str) -> Option<u32> {
        self.inspect(domain, |bucket| bucket.failure_streak)
    }

    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self
            .buckets
            .read()
            .expect("rate limiter lock poisoned")
            .keys()
            .cloned()
            .collect();
        domains.sort();
        domains
    }

    pub fn snapshot(&self) -> Vec<BucketSnapshot> {
        let buckets = self.buckets.read().expect("rate limiter lock poisoned");
        let mut snapshots: Vec<BucketSnapshot> = buckets
            .iter()
            .map(|(domain, bucket)| {
                bucket
                    .lock()
                    .expect("bucket lock poisoned")
                    .snapshot(domain)
            })
            .collect();
        snapshots.sort_by(|a, b| a.domain.cmp(&b.domain));
        snapshots
    }

    /// Replaces the state of every domain present in `snapshots`.
    pub fn restore(&self, snapshots: &[BucketSnapshot]) -> Result<(), RateLimitError> {
        for snapshot in snapshots {
            LimitSpec {
                capacity: snapshot.capacity,
                window_secs: snapshot.window_secs,
                algorithm: snapshot.algorithm,
                rate: Some(snapshot.base_rate),
                burst: snapshot.burst,
            }
            .validate()?;
            normalize_domain(&snapshot.domain)?;
        }

        let mut guard = self.buckets.write().expect("rate limiter lock poisoned");
        for snapshot in snapshots {
            let domain = normalize_domain(&snapshot.domain)?;
            guard.insert(domain, Arc::new(Mutex::new(Bucket::from_snapshot(snapshot))));
        }
        Ok(())
    }
}

impl Default for AdaptiveRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

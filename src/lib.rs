//! # stealthcrawl-rs
//!
//! The decision core of a polite, human-looking crawler. It does not perform
//! any network I/O itself; a crawl worker consults it before and after every
//! request.
//!
//! ## Features
//!
//! - Persisted browser identities with usage, success and ban tracking
//! - Randomised but internally consistent browser/hardware/TLS fingerprints
//! - Per-domain token bucket, leaky bucket and sliding window limits that
//!   back off on 429/503 and recover on success streaks
//! - Human timing models: Fitts's law pointer paths, typing with typos,
//!   reading time, scroll bursts, circadian and fatigue effects
//! - Q-learning action selection, a UCB1 profile bandit and anomaly checks
//!
//! ## Example
//!
//! ```no_run
//! use stealthcrawl_rs::{ActionKind, StealthCoordinator};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stealth = StealthCoordinator::new()?;
//!     let profile = stealth.select_profile()?;
//!
//!     let admission = stealth.allow_request("example.com")?;
//!     if admission.allowed {
//!         std::thread::sleep(stealth.inter_request_delay(ActionKind::Navigate));
//!         // ... perform the request with `profile.fingerprint` ...
//!         stealth.record_response("example.com", 200)?;
//!         stealth.report_outcome(&profile.id, true);
//!     } else {
//!         std::thread::sleep(admission.wait);
//!     }
//!     Ok(())
//! }
//! ```

mod coordinator;

pub mod config;
pub mod modules;

pub use crate::coordinator::{
    BehaviorSession,
    DEFAULT_SESSION,
    StealthCoordinator,
    StealthCoordinatorBuilder,
    StealthError,
    StealthResult,
    TraceAudit,
};

pub use crate::config::{
    BehaviorConfig,
    ConfigError,
    LearningConfig,
    PatternConfig,
    ProfileConfig,
    RateLimitConfig,
    RiskWeights,
    StealthConfig,
    StealthConfigBuilder,
};

pub use crate::modules::{
    ActionKind,
    AdaptiveRateLimiter,
    Admission,
    BehaviorEngine,
    BehaviorState,
    BotSignature,
    Clock,
    DetectionRisk,
    EventDispatcher,
    EventHandler,
    EventRecorder,
    Fingerprint,
    FingerprintGenerator,
    LimitSpec,
    LoggingHandler,
    ManualClock,
    MemoryProfileStore,
    MousePath,
    Outcome,
    PageMetrics,
    PatternRecognizer,
    Persona,
    Point,
    Profile,
    ProfileBandit,
    ProfileError,
    ProfileSelector,
    ProfileStore,
    QLearningCoordinator,
    RateAlgorithm,
    RateLimitError,
    RedbProfileStore,
    RequestTrace,
    RiskLevel,
    ScrollEvent,
    SharedClock,
    SnapshotStore,
    StealthEvent,
    StoreError,
    SystemClock,
    TypingPattern,
    VisitorSession,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Decision components
//!
//! Identity, pacing, behaviour and learning services a crawl worker consults
//! before and after every network action. All of them take time from an
//! injected clock and report policy changes through the event dispatcher.

pub mod behavior;
pub mod clock;
pub mod events;
pub mod learning;
pub mod patterns;
pub mod profiles;
pub mod rate_limit;
pub mod spoofing;
pub mod store;

// Re-export commonly used types
pub use behavior::{
    ActionKind, BehaviorEngine, BehaviorState, Experience, Key, Keystroke, MousePath, PageMetrics,
    PathPoint, Persona, PersonaTraits, Point, QTableSnapshot, ScrollEvent, SessionStats,
    TypingPattern, TypingSkill, VisitorSession,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock, system_clock};
pub use events::{
    BanEvent, CleanupEvent, EventDispatcher, EventHandler, EventRecorder, LoggingHandler,
    ProfileEvent, RateChangeEvent, StealthEvent,
};
pub use learning::{
    LearningError, LearningResult, Outcome, PolicyEntry, PolicySnapshot, ProfileBandit,
    QLearningCoordinator, Transition,
};
pub use patterns::{
    AnomalyScore, BotKind, BotSignature, Clustering, IsolationForest, PatternRecognizer,
    RequestTrace, TrafficFeatures, cosine_similarity, detect_bot_by_pattern,
    detect_bot_signature, extract_features, normalize_features, rank_by_similarity,
};
pub use profiles::{
    DetectionRisk, Profile, ProfileError, ProfileResult, ProfileSelector, ProfileStats,
    RiskLevel, Session,
};
pub use rate_limit::{
    AdaptiveRateLimiter, Admission, BucketSnapshot, LimitSpec, RateAlgorithm, RateLimitError,
    ResponseClass,
};
pub use spoofing::{Fingerprint, FingerprintGenerator, FingerprintSummary};
pub use store::{
    MemoryProfileStore, ProfileStore, RedbProfileStore, SnapshotStore, StoreError, StoreResult,
};

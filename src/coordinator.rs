//! Facade wiring every component together for a crawl worker.
//!
//! A worker asks for a profile, asks whether it may hit a domain, asks the
//! behaviour engine what to do and how long it takes, performs the action
//! itself and finally reports what happened.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::{ConfigError, StealthConfig};
use crate::modules::behavior::{
    ActionKind, BehaviorEngine, BehaviorState, MousePath, PageMetrics, Point, QTableSnapshot,
    ScrollEvent, SessionStats, TypingPattern, VisitorSession,
};
use crate::modules::clock::{SharedClock, system_clock};
use crate::modules::events::EventDispatcher;
use crate::modules::learning::{
    LearningError, Outcome, PolicySnapshot, ProfileBandit, QLearningCoordinator,
};
use crate::modules::patterns::{
    BotSignature, PatternRecognizer, RequestTrace, detect_bot_by_pattern, detect_bot_signature,
    extract_features,
};
use crate::modules::profiles::{DetectionRisk, Profile, ProfileError, ProfileSelector};
use crate::modules::rate_limit::{AdaptiveRateLimiter, Admission, BucketSnapshot, RateLimitError};
use crate::modules::spoofing::FingerprintGenerator;
use crate::modules::store::{
    MemoryProfileStore, ProfileStore, RedbProfileStore, SnapshotStore, StoreError,
};

const BEHAVIOR_SNAPSHOT: &str = "behavior.q_table";
const POLICY_SNAPSHOT: &str = "learning.policy";
const BANDIT_SNAPSHOT: &str = "learning.bandit";
const RATE_LIMIT_SNAPSHOT: &str = "rate_limit.buckets";

/// Session used by the coordinator's own timing helpers.
pub const DEFAULT_SESSION: &str = "default";

#[derive(Debug, Error)]
pub enum StealthError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("profile error: {0}")]
    Profile(#[from] ProfileError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),
    #[error("learning error: {0}")]
    Learning(#[from] LearningError),
    #[error("snapshot encoding failed: {0}")]
    Snapshot(#[from] serde_json::Error),
}

pub type StealthResult<T> = Result<T, StealthError>;

/// User-agent and traffic verdicts for one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceAudit {
    pub agent: BotSignature,
    pub traffic: BotSignature,
}

impl TraceAudit {
    pub fn looks_automated(&self) -> bool {
        self.agent.is_bot || self.traffic.is_bot
    }
}

/// Builder for [`StealthCoordinator`].
#[derive(Debug)]
pub struct StealthCoordinatorBuilder {
    config: StealthConfig,
    store: Option<Arc<dyn ProfileStore>>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    clock: Option<SharedClock>,
    events: Option<EventDispatcher>,
    seed: Option<u64>,
    utc_offset_hours: i32,
}

impl StealthCoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            config: StealthConfig::default(),
            store: None,
            snapshots: None,
            clock: None,
            events: None,
            seed: None,
            utc_offset_hours: 0,
        }
    }

    pub fn with_config(mut self, config: StealthConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ProfileStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_snapshot_store(mut self, snapshots: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    /// Opens (or creates) a redb file used for both profiles and snapshots.
    pub fn with_database(mut self, path: impl AsRef<Path>) -> StealthResult<Self> {
        let store = Arc::new(RedbProfileStore::open(path)?);
        self.store = Some(store.clone());
        self.snapshots = Some(store);
        Ok(self)
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = Some(events);
        self
    }

    /// Seeds every random source; two coordinators built with the same seed
    /// make the same choices.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// UTC offset of the simulated visitor, used for circadian effects.
    pub fn with_utc_offset(mut self, hours: i32) -> Self {
        self.utc_offset_hours = hours;
        self
    }

    pub fn build(self) -> StealthResult<StealthCoordinator> {
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(system_clock);
        let events = self.events.unwrap_or_else(EventDispatcher::with_logging);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryProfileStore::new()) as Arc<dyn ProfileStore>);
        let config = self.config;

        let (behavior, policy, patterns, generator) = match self.seed {
            Some(seed) => (
                BehaviorEngine::with_seed(config.behavior.clone(), seed),
                QLearningCoordinator::with_seed(config.learning.clone(), seed.wrapping_add(1)),
                PatternRecognizer::with_seed(config.patterns.clone(), seed.wrapping_add(2)),
                FingerprintGenerator::with_seed(seed.wrapping_add(3)),
            ),
            None => (
                BehaviorEngine::new(config.behavior.clone()),
                QLearningCoordinator::new(config.learning.clone()),
                PatternRecognizer::new(config.patterns.clone()),
                FingerprintGenerator::new(),
            ),
        };
        let behavior = behavior
            .with_clock(clock.clone())
            .with_utc_offset(self.utc_offset_hours);

        let profiles = ProfileSelector::new(store, config.profiles.clone())
            .with_clock(clock.clone())
            .with_events(events.clone())
            .with_generator(generator);
        let limiter = AdaptiveRateLimiter::try_new(config.rate_limit.clone())?
            .with_clock(clock.clone())
            .with_events(events.clone());

        log::info!(
            "Stealth coordinator ready (rate algorithm {})",
            config.rate_limit.default_algorithm
        );

        Ok(StealthCoordinator {
            inner: Arc::new(CoordinatorInner {
                config,
                profiles,
                limiter,
                behavior: Mutex::new(behavior),
                sessions: Mutex::new(HashMap::new()),
                policy: Mutex::new(policy),
                bandit: Mutex::new(ProfileBandit::new()),
                patterns: Mutex::new(patterns),
                snapshots: self.snapshots,
                events,
            }),
        })
    }
}

impl Default for StealthCoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct CoordinatorInner {
    config: StealthConfig,
    profiles: ProfileSelector,
    limiter: AdaptiveRateLimiter,
    behavior: Mutex<BehaviorEngine>,
    /// Lock order: `sessions` before `behavior`.
    sessions: Mutex<HashMap<String, VisitorSession>>,
    policy: Mutex<QLearningCoordinator>,
    bandit: Mutex<ProfileBandit>,
    patterns: Mutex<PatternRecognizer>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    events: EventDispatcher,
}

/// Cloneable handle; clones share all state.
#[derive(Debug, Clone)]
pub struct StealthCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl StealthCoordinator {
    /// Coordinator with default configuration and an in-memory store.
    pub fn new() -> StealthResult<Self> {
        Self::builder().build()
    }

    pub fn builder() -> StealthCoordinatorBuilder {
        StealthCoordinatorBuilder::new()
    }

    pub fn config(&self) -> &StealthConfig {
        &self.inner.config
    }

    pub fn profiles(&self) -> &ProfileSelector {
        &self.inner.profiles
    }

    pub fn rate_limiter(&self) -> &AdaptiveRateLimiter {
        &self.inner.limiter
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.inner.events
    }

    fn behavior(&self) -> MutexGuard<'_, BehaviorEngine> {
        self.inner.behavior.lock().expect("behavior engine lock poisoned")
    }

    /// Runs `f` on the shared engine with `session_id`'s visitor state
    /// swapped in. Unknown ids start a new visitor.
    fn in_session<T>(&self, session_id: &str, f: impl FnOnce(&mut BehaviorEngine) -> T) -> T {
        let mut sessions = self.inner.sessions.lock().expect("session lock poisoned");
        let mut behavior = self.behavior();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| behavior.start_session());
        behavior.in_session(session, f)
    }

    /// Handle on one simulated visitor. Fatigue, persona and page count are
    /// kept per session id; learned Q-values are shared by all of them.
    pub fn session(&self, session_id: impl Into<String>) -> BehaviorSession {
        BehaviorSession {
            coordinator: self.clone(),
            id: session_id.into(),
        }
    }

    /// Forgets a visitor session. Returns whether it existed.
    pub fn end_session(&self, session_id: &str) -> bool {
        self.inner
            .sessions
            .lock()
            .expect("session lock poisoned")
            .remove(session_id)
            .is_some()
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().expect("session lock poisoned").len()
    }

    fn bandit(&self) -> MutexGuard<'_, ProfileBandit> {
        self.inner.bandit.lock().expect("bandit lock poisoned")
    }

    /// Runs `f` against the general-purpose Q-learning policy.
    pub fn with_policy<T>(&self, f: impl FnOnce(&mut QLearningCoordinator) -> T) -> T {
        f(&mut self.inner.policy.lock().expect("policy lock poisoned"))
    }

    pub fn with_patterns<T>(&self, f: impl FnOnce(&mut PatternRecognizer) -> T) -> T {
        f(&mut self.inner.patterns.lock().expect("pattern recognizer lock poisoned"))
    }

    // Profiles

    pub fn select_profile(&self) -> StealthResult<Profile> {
        Ok(self.inner.profiles.get_profile(false)?)
    }

    /// Picks among usable profiles with UCB1 instead of the greedy
    /// success-rate order, creating a profile when none is usable.
    pub fn select_profile_by_bandit(&self) -> StealthResult<Profile> {
        let usable = self.inner.profiles.usable_profiles()?;
        let ids: Vec<&str> = usable.iter().map(|p| p.id.as_str()).collect();
        let choice = self.bandit().select(&ids).map(str::to_string);

        if let Some(id) = choice
            && let Some(profile) = self.inner.profiles.mark_used(&id)?
        {
            log::debug!("Bandit selected profile {id}");
            return Ok(profile);
        }
        Ok(self.inner.profiles.get_profile(false)?)
    }

    /// Folds one outcome into the profile and the bandit. Returns the new
    /// success rate, or `None` for an unknown profile.
    pub fn report_outcome(&self, profile_id: &str, success: bool) -> Option<f64> {
        let rate = self.inner.profiles.update_profile_success(profile_id, success)?;
        let mut bandit = self.bandit();
        bandit.record(profile_id, if success { 1.0 } else { 0.0 });
        if rate < self.inner.config.profiles.ban_threshold * 100.0 {
            bandit.remove(profile_id);
        }
        Some(rate)
    }

    /// Records a cancelled or timed-out run as a failure for both the
    /// profile and the domain.
    pub fn report_abort(&self, profile_id: &str, domain: &str) -> StealthResult<Option<f64>> {
        log::debug!("Run for profile {profile_id} on {domain} aborted");
        let rate = self.report_outcome(profile_id, false);
        self.inner.limiter.record_failure(domain)?;
        Ok(rate)
    }

    pub fn assess_risk(&self, profile_id: &str) -> DetectionRisk {
        self.inner.profiles.assess_detection_risk(profile_id)
    }

    pub fn cleanup_profiles(&self, older_than_days: u32) -> StealthResult<usize> {
        Ok(self.inner.profiles.cleanup(older_than_days)?)
    }

    // Rate limiting

    pub fn allow_request(&self, domain: &str) -> StealthResult<Admission> {
        Ok(self.inner.limiter.check(domain)?)
    }

    pub fn record_response(&self, domain: &str, status: u16) -> StealthResult<f64> {
        Ok(self.inner.limiter.record_response(domain, status)?)
    }

    pub fn backoff(&self, domain: &str, attempt: u32) -> Duration {
        self.inner.limiter.calculate_backoff(domain, attempt)
    }

    // Behaviour

    pub fn next_action<'a>(&self, state: &BehaviorState, actions: &[&'a str]) -> Option<&'a str> {
        self.session(DEFAULT_SESSION).next_action(state, actions)
    }

    pub fn learn(
        &self,
        state: &BehaviorState,
        action: &str,
        reward: f64,
        next_state: &BehaviorState,
    ) -> f64 {
        self.session(DEFAULT_SESSION).learn(state, action, reward, next_state)
    }

    /// Scores `outcome` and learns from it. A ban ends the episode.
    pub fn learn_outcome(
        &self,
        state: &BehaviorState,
        action: &str,
        outcome: &Outcome,
        next_state: &BehaviorState,
    ) -> f64 {
        self.session(DEFAULT_SESSION)
            .learn_outcome(state, action, outcome, next_state)
    }

    pub fn q_value(&self, state: &BehaviorState, action: &str) -> f64 {
        self.behavior().q_value(state, action)
    }

    pub fn mouse_movement(&self, start: Point, target: Point) -> MousePath {
        self.session(DEFAULT_SESSION).mouse_movement(start, target)
    }

    pub fn typing_pattern(&self, text: &str) -> TypingPattern {
        self.session(DEFAULT_SESSION).typing_pattern(text)
    }

    pub fn scroll_pattern(&self, content_height: u32) -> Vec<ScrollEvent> {
        self.session(DEFAULT_SESSION).scroll_pattern(content_height)
    }

    pub fn inter_request_delay(&self, kind: ActionKind) -> Duration {
        self.session(DEFAULT_SESSION).inter_request_delay(kind)
    }

    pub fn reading_time(&self, metrics: PageMetrics) -> Duration {
        self.session(DEFAULT_SESSION).reading_time(metrics)
    }

    pub fn should_continue_browsing(&self) -> bool {
        self.session(DEFAULT_SESSION).should_continue_browsing()
    }

    pub fn session_stats(&self) -> SessionStats {
        self.session(DEFAULT_SESSION).stats()
    }

    pub fn reset_session(&self) {
        self.session(DEFAULT_SESSION).reset();
    }

    // Self-checks

    pub fn audit_trace(&self, trace: &RequestTrace) -> TraceAudit {
        let agent = detect_bot_signature(trace.user_agent.as_deref().unwrap_or_default());
        let traffic = detect_bot_by_pattern(&extract_features(trace));
        let audit = TraceAudit { agent, traffic };
        if audit.looks_automated() {
            log::warn!(
                "Session looks automated (agent {:?}, traffic {:.2})",
                audit.agent.kind,
                audit.traffic.confidence
            );
        }
        audit
    }

    // Persistence

    /// Writes learned state to the snapshot store. Returns `false` when no
    /// snapshot store is configured.
    pub fn save_state(&self) -> StealthResult<bool> {
        let Some(snapshots) = &self.inner.snapshots else {
            return Ok(false);
        };

        let q_table = self.behavior().export_q_table();
        let policy = self.with_policy(|policy| policy.export());
        let bandit = self.bandit().clone();
        let buckets = self.inner.limiter.snapshot();

        save(snapshots.as_ref(), BEHAVIOR_SNAPSHOT, &q_table)?;
        save(snapshots.as_ref(), POLICY_SNAPSHOT, &policy)?;
        save(snapshots.as_ref(), BANDIT_SNAPSHOT, &bandit)?;
        save(snapshots.as_ref(), RATE_LIMIT_SNAPSHOT, &buckets)?;
        log::info!(
            "Saved learned state ({} Q states, {} buckets)",
            q_table.values.len(),
            buckets.len()
        );
        Ok(true)
    }

    /// Restores whatever [`save_state`](Self::save_state) wrote. Missing
    /// snapshots are skipped.
    pub fn load_state(&self) -> StealthResult<bool> {
        let Some(snapshots) = &self.inner.snapshots else {
            return Ok(false);
        };

        if let Some(q_table) = load::<QTableSnapshot>(snapshots.as_ref(), BEHAVIOR_SNAPSHOT)? {
            self.behavior().import_q_table(&q_table);
        }
        if let Some(policy) = load::<PolicySnapshot>(snapshots.as_ref(), POLICY_SNAPSHOT)? {
            self.with_policy(|learner| learner.import(&policy));
        }
        if let Some(bandit) = load::<ProfileBandit>(snapshots.as_ref(), BANDIT_SNAPSHOT)? {
            *self.bandit() = bandit;
        }
        if let Some(buckets) = load::<Vec<BucketSnapshot>>(snapshots.as_ref(), RATE_LIMIT_SNAPSHOT)? {
            self.inner.limiter.restore(&buckets)?;
        }
        Ok(true)
    }
}

/// Timing and learning calls on behalf of one visitor session.
#[derive(Debug, Clone)]
pub struct BehaviorSession {
    coordinator: StealthCoordinator,
    id: String,
}

impl BehaviorSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn run<T>(&self, f: impl FnOnce(&mut BehaviorEngine) -> T) -> T {
        self.coordinator.in_session(&self.id, f)
    }

    pub fn next_action<'a>(&self, state: &BehaviorState, actions: &[&'a str]) -> Option<&'a str> {
        self.run(|engine| engine.select_action(state, actions))
    }

    pub fn learn(
        &self,
        state: &BehaviorState,
        action: &str,
        reward: f64,
        next_state: &BehaviorState,
    ) -> f64 {
        self.run(|engine| engine.learn(state, action, reward, next_state))
    }

    /// Scores `outcome` and learns from it. A ban ends the episode.
    pub fn learn_outcome(
        &self,
        state: &BehaviorState,
        action: &str,
        outcome: &Outcome,
        next_state: &BehaviorState,
    ) -> f64 {
        let reward = QLearningCoordinator::calculate_reward(outcome);
        self.run(|engine| {
            if outcome.banned {
                engine.learn_terminal(state, action, reward)
            } else {
                engine.learn(state, action, reward, next_state)
            }
        })
    }

    pub fn mouse_movement(&self, start: Point, target: Point) -> MousePath {
        self.run(|engine| engine.mouse_movement(start, target))
    }

    pub fn typing_pattern(&self, text: &str) -> TypingPattern {
        self.run(|engine| engine.typing_pattern(text))
    }

    pub fn scroll_pattern(&self, content_height: u32) -> Vec<ScrollEvent> {
        self.run(|engine| engine.scroll_pattern(content_height))
    }

    pub fn inter_request_delay(&self, kind: ActionKind) -> Duration {
        self.run(|engine| engine.inter_request_delay(kind))
    }

    pub fn reading_time(&self, metrics: PageMetrics) -> Duration {
        self.run(|engine| engine.reading_time(metrics))
    }

    pub fn should_continue_browsing(&self) -> bool {
        self.run(|engine| engine.should_continue_browsing())
    }

    pub fn stats(&self) -> SessionStats {
        self.run(|engine| engine.session_stats())
    }

    /// New persona, zero fatigue and page count for this visitor only.
    pub fn reset(&self) {
        self.run(|engine| engine.reset_session());
    }
}

fn save<T: Serialize>(store: &dyn SnapshotStore, key: &str, value: &T) -> StealthResult<()> {
    let payload = serde_json::to_vec(value)?;
    store.save_snapshot(key, &payload)?;
    Ok(())
}

fn load<T: DeserializeOwned>(store: &dyn SnapshotStore, key: &str) -> StealthResult<Option<T>> {
    match store.load_snapshot(key)? {
        Some(payload) => Ok(Some(serde_json::from_slice(&payload)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::clock::ManualClock;
    use crate::modules::events::EventRecorder;
    use chrono::{TimeZone, Utc};

    fn coordinator() -> (StealthCoordinator, ManualClock, Arc<EventRecorder>) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap());
        let recorder = Arc::new(EventRecorder::new());
        let events = EventDispatcher::new();
        events.register_handler(recorder.clone());
        let coordinator = StealthCoordinator::builder()
            .with_clock(Arc::new(clock.clone()))
            .with_events(events)
            .with_seed(42)
            .build()
            .unwrap();
        (coordinator, clock, recorder)
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = StealthConfig::default();
        config.rate_limit.default_algorithm = "fixed_window".into();
        let result = StealthCoordinator::builder().with_config(config).build();
        assert!(matches!(result, Err(StealthError::Config(_))));
    }

    #[test]
    fn outcome_reporting_bans_bad_profiles() {
        let (coordinator, _, recorder) = coordinator();
        let profile = coordinator.select_profile().unwrap();
        assert_eq!(coordinator.report_outcome(&profile.id, true), Some(100.0));
        assert_eq!(coordinator.report_outcome(&profile.id, false), Some(50.0));
        let rate = coordinator.report_outcome(&profile.id, false).unwrap();
        assert!((rate - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(recorder.count("profile_banned"), 1);
        assert_eq!(coordinator.report_outcome("missing", true), None);

        let next = coordinator.select_profile().unwrap();
        assert_ne!(next.id, profile.id);
    }

    #[test]
    fn bandit_tries_every_profile_first() {
        let (coordinator, _, _) = coordinator();
        let a = coordinator.profiles().get_profile(true).unwrap();
        let b = coordinator.profiles().get_profile(true).unwrap();

        let first = coordinator.select_profile_by_bandit().unwrap();
        coordinator.report_outcome(&first.id, true);
        let second = coordinator.select_profile_by_bandit().unwrap();
        assert_ne!(first.id, second.id);

        let mut seen = vec![first.id, second.id];
        seen.sort();
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn abort_counts_against_profile_and_domain() {
        let (coordinator, _, _) = coordinator();
        let profile = coordinator.select_profile().unwrap();
        let rate = coordinator.report_abort(&profile.id, "shop.example").unwrap();
        assert_eq!(rate, Some(0.0));
        assert!(
            coordinator
                .profiles()
                .profile(&profile.id)
                .unwrap()
                .unwrap()
                .banned
        );
        assert!(matches!(
            coordinator.report_abort(&profile.id, ""),
            Err(StealthError::RateLimit(RateLimitError::EmptyDomain))
        ));
    }

    #[test]
    fn throttling_slows_the_domain() {
        let (coordinator, _, recorder) = coordinator();
        assert!(coordinator.allow_request("https://Shop.Example/a").unwrap().allowed);
        assert_eq!(coordinator.record_response("shop.example", 429).unwrap(), 0.5);
        assert_eq!(recorder.count("rate_reduced"), 1);
        assert!(coordinator.backoff("shop.example", 1) >= Duration::from_secs(3));
    }

    #[test]
    fn learning_from_outcomes() {
        let (coordinator, _, _) = coordinator();
        let state = BehaviorState::new("listing", 1, false);
        let next = BehaviorState::new("product", 2, false);

        let q = coordinator.learn_outcome(&state, "click", &Outcome::success(), &next);
        assert!((q - 1.0).abs() < 1e-9);
        let banned = Outcome {
            banned: true,
            ..Outcome::default()
        };
        assert!(coordinator.learn_outcome(&state, "scroll", &banned, &next) < 0.0);
        assert_eq!(coordinator.q_value(&state, "click"), q);
        assert!(coordinator.next_action(&state, &["click", "scroll"]).is_some());
    }

    #[test]
    fn timing_helpers_delegate() {
        let (coordinator, clock, _) = coordinator();
        assert!(coordinator.typing_pattern("").keystrokes.is_empty());
        assert!(coordinator.scroll_pattern(0).is_empty());
        assert!(coordinator.inter_request_delay(ActionKind::Search) >= Duration::from_millis(200));
        assert!(coordinator.reading_time(PageMetrics::default()).is_zero());
        let path = coordinator.mouse_movement(Point::new(0.0, 0.0), Point::new(0.0, 0.0));
        assert_eq!(path.points.len(), 1);

        clock.advance(Duration::from_secs(90));
        coordinator.should_continue_browsing();
        let stats = coordinator.session_stats();
        assert_eq!(stats.pages_visited, 1);
        assert_eq!(stats.session_duration_secs, 90.0);
        coordinator.reset_session();
        assert_eq!(coordinator.session_stats().pages_visited, 0);
    }

    #[test]
    fn visitor_sessions_tire_independently() {
        let (coordinator, clock, _) = coordinator();
        let alice = coordinator.session("worker-1");
        let bob = coordinator.session("worker-2");
        let state = BehaviorState::new("listing", 1, false);
        let next = BehaviorState::new("product", 2, false);

        for _ in 0..5 {
            alice.inter_request_delay(ActionKind::Click);
        }
        alice.should_continue_browsing();
        clock.advance(Duration::from_secs(30));
        bob.scroll_pattern(1200);
        let q = bob.learn(&state, "click", 10.0, &next);

        let per_action = coordinator.config().behavior.fatigue_per_action;
        assert!((alice.stats().fatigue - 5.0 * per_action).abs() < 1e-9);
        assert_eq!(alice.stats().pages_visited, 1);
        assert_eq!(alice.stats().session_duration_secs, 30.0);
        assert!((bob.stats().fatigue - per_action).abs() < 1e-9);
        assert_eq!(bob.stats().pages_visited, 0);
        assert_eq!(coordinator.session_count(), 2);

        bob.reset();
        assert_eq!(bob.stats().fatigue, 0.0);
        assert!(alice.stats().fatigue > 0.0);
        assert_eq!(coordinator.q_value(&state, "click"), q);
        assert_eq!(alice.id(), "worker-1");

        assert!(coordinator.end_session("worker-1"));
        assert!(!coordinator.end_session("worker-1"));
        assert_eq!(alice.stats().fatigue, 0.0);
    }

    #[test]
    fn audits_traces() {
        let (coordinator, _, _) = coordinator();
        let profile = coordinator.select_profile().unwrap();
        let human = RequestTrace {
            user_agent: Some(profile.fingerprint.user_agent.clone()),
            page_views: vec!["/".into(), "/catalog".into()],
            ..RequestTrace::default()
        };
        assert!(!coordinator.audit_trace(&human).looks_automated());

        let scripted = RequestTrace {
            user_agent: Some("curl/8.4.0".into()),
            ..RequestTrace::default()
        };
        assert!(coordinator.audit_trace(&scripted).looks_automated());
        assert!(coordinator.with_patterns(|patterns| !patterns.is_trained()));
    }

    #[test]
    fn state_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stealth.redb");
        let state = BehaviorState::new("cart", 1, false);

        {
            let coordinator = StealthCoordinator::builder()
                .with_database(&path)
                .unwrap()
                .with_seed(1)
                .build()
                .unwrap();
            coordinator.learn(&state, "checkout", 20.0, &state);
            coordinator.with_policy(|policy| policy.update_q_value("s", "a", 10.0, "n"));
            coordinator.record_response("shop.example", 429).unwrap();
            assert!(coordinator.save_state().unwrap());
        }

        let restored = StealthCoordinator::builder()
            .with_database(&path)
            .unwrap()
            .with_seed(2)
            .build()
            .unwrap();
        assert!(restored.load_state().unwrap());
        assert!((restored.q_value(&state, "checkout") - 2.0).abs() < 1e-9);
        assert!(restored.with_policy(|policy| policy.q_value("s", "a")) > 0.0);
        assert_eq!(
            restored.rate_limiter().adjustment_factor("shop.example"),
            Some(0.5)
        );

        let (memory_only, _, _) = coordinator();
        assert!(!memory_only.save_state().unwrap());
    }
}

//! Human behaviour simulation.
//!
//! The [`BehaviorEngine`] owns a Q-table over coarse page states and the
//! active [`VisitorSession`]: a browsing persona, accumulated fatigue and the
//! page count. Timing helpers (pointer paths, typing, reading, scrolling and
//! the delay between requests) are modulated by that session, the learned
//! values and the hour of day. Several visitors can share one engine by
//! swapping their sessions in with [`BehaviorEngine::in_session`].

pub mod circadian;
pub mod distributions;
pub mod motor;
mod persona;

pub use motor::{
    Key, Keystroke, MousePath, PathPoint, Point, ScrollEvent, TypingPattern, TypingSkill,
};
pub use persona::{Persona, PersonaTraits};

use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::BehaviorConfig;
use crate::modules::clock::{SharedClock, seconds_between, system_clock};

/// Coarse page state: category, navigation depth and whether the previous
/// step failed. Rendered as `"{category}|d{depth}|e{0|1}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BehaviorState {
    pub category: String,
    pub depth: u32,
    pub had_error: bool,
}

impl BehaviorState {
    pub fn new(category: impl Into<String>, depth: u32, had_error: bool) -> Self {
        let category = category.into().replace('|', "_");
        Self {
            category,
            depth,
            had_error,
        }
    }

    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BehaviorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|d{}|e{}",
            self.category,
            self.depth,
            u8::from(self.had_error)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateParseError(pub String);

impl fmt::Display for StateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed behaviour state key: {}", self.0)
    }
}

impl std::error::Error for StateParseError {}

impl FromStr for BehaviorState {
    type Err = StateParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let malformed = || StateParseError(raw.to_string());
        let mut parts = raw.rsplitn(3, '|');
        let error = parts.next().ok_or_else(malformed)?;
        let depth = parts.next().ok_or_else(malformed)?;
        let category = parts.next().ok_or_else(malformed)?;

        let depth = depth
            .strip_prefix('d')
            .and_then(|d| d.parse().ok())
            .ok_or_else(malformed)?;
        let had_error = match error {
            "e0" => false,
            "e1" => true,
            _ => return Err(malformed()),
        };
        Ok(Self {
            category: category.to_string(),
            depth,
            had_error,
        })
    }
}

/// Kinds of user action with their base delay range in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    Scroll,
    Navigate,
    Search,
    Compare,
    Checkout,
    Other,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Scroll => "scroll",
            ActionKind::Navigate => "navigate",
            ActionKind::Search => "search",
            ActionKind::Compare => "compare",
            ActionKind::Checkout => "checkout",
            ActionKind::Other => "other",
        }
    }

    pub fn delay_range(self) -> (f64, f64) {
        match self {
            ActionKind::Click => (0.3, 1.2),
            ActionKind::Scroll => (0.5, 2.0),
            ActionKind::Navigate => (1.5, 4.5),
            ActionKind::Search => (2.0, 8.0),
            ActionKind::Compare => (3.0, 12.0),
            ActionKind::Checkout => (5.0, 20.0),
            ActionKind::Other => (1.0, 5.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PageMetrics {
    pub word_count: u32,
    pub image_count: u32,
    /// Rough difficulty on a 0-10 scale.
    pub complexity: f64,
}

/// One learning transition. `next_state` is `None` for terminal steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub state: BehaviorState,
    pub action: String,
    pub reward: f64,
    pub next_state: Option<BehaviorState>,
}

/// Serializable Q-table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QTableSnapshot {
    pub epsilon: f64,
    pub values: BTreeMap<String, BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub persona: Persona,
    pub pages_visited: u32,
    pub session_duration_secs: f64,
    pub fatigue: f64,
    pub avg_time_per_page_secs: f64,
    pub q_states: usize,
    pub experience_buffer_size: usize,
    pub epsilon: f64,
}

/// Shortest pause the engine ever returns between requests, in seconds.
pub const MIN_DELAY_SECS: f64 = 0.2;
const DISTRACTION_CHANCE: f64 = 0.05;
const IMPATIENCE_CHANCE: f64 = 0.10;
/// Bounds on the Q-learning stretch applied to timings.
const MAX_Q_ADJUSTMENT: f64 = 0.5;
/// Attention-span bounds on reading time, before persona scaling.
const MIN_ATTENTION_SECS: f64 = 8.0;
const MAX_ATTENTION_SECS: f64 = 45.0;

/// Occasional distraction (x2-3) and impatience (x0.4-0.6) applied to a pause.
fn mood_multiplier<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let mut multiplier = 1.0;
    if rng.r#gen::<f64>() < DISTRACTION_CHANCE {
        multiplier *= rng.gen_range(2.0..3.0);
    }
    if rng.r#gen::<f64>() < IMPATIENCE_CHANCE {
        multiplier *= rng.gen_range(0.4..0.6);
    }
    multiplier
}

/// State of one simulated visitor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitorSession {
    persona: Persona,
    fatigue: f64,
    pages_visited: u32,
    started_at: DateTime<Utc>,
    current_state: Option<BehaviorState>,
}

impl VisitorSession {
    pub fn new(persona: Persona, started_at: DateTime<Utc>) -> Self {
        Self {
            persona,
            fatigue: 0.0,
            pages_visited: 0,
            started_at,
            current_state: None,
        }
    }

    pub fn persona(&self) -> Persona {
        self.persona
    }

    pub fn fatigue(&self) -> f64 {
        self.fatigue
    }

    pub fn pages_visited(&self) -> u32 {
        self.pages_visited
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

#[derive(Debug)]
pub struct BehaviorEngine {
    config: BehaviorConfig,
    rng: StdRng,
    clock: SharedClock,
    utc_offset: FixedOffset,
    q_table: HashMap<String, HashMap<String, f64>>,
    experiences: VecDeque<Experience>,
    epsilon: f64,
    session: VisitorSession,
}

impl BehaviorEngine {
    pub fn new(config: BehaviorConfig) -> Self {
        Self::from_rng(config, StdRng::from_entropy())
    }

    /// Deterministic engine, mainly for tests.
    pub fn with_seed(config: BehaviorConfig, seed: u64) -> Self {
        Self::from_rng(config, StdRng::seed_from_u64(seed))
    }

    fn from_rng(config: BehaviorConfig, mut rng: StdRng) -> Self {
        let clock = system_clock();
        let persona = Persona::pick(&mut rng);
        log::debug!("Behaviour persona selected: {persona}");
        Self {
            epsilon: config.epsilon,
            experiences: VecDeque::with_capacity(config.replay_capacity.min(1024)),
            config,
            rng,
            utc_offset: Utc.fix(),
            q_table: HashMap::new(),
            session: VisitorSession::new(persona, clock.now()),
            clock,
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.session.started_at = clock.now();
        self.clock = clock;
        self
    }

    pub fn with_persona(mut self, persona: Persona) -> Self {
        self.session.persona = persona;
        self
    }

    /// Evaluates circadian effects in a fixed UTC offset (e.g. +13 for NZDT).
    /// Offsets outside +/-23 hours are ignored.
    pub fn with_utc_offset(mut self, hours: i32) -> Self {
        match hours.checked_mul(3600).and_then(FixedOffset::east_opt) {
            Some(offset) => self.utc_offset = offset,
            None => log::warn!("Ignoring out-of-range UTC offset of {hours} hours"),
        }
        self
    }

    pub fn persona(&self) -> Persona {
        self.session.persona
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn fatigue(&self) -> f64 {
        self.session.fatigue
    }

    pub fn session(&self) -> &VisitorSession {
        &self.session
    }

    /// Fresh visitor with a newly drawn persona, starting now. The active
    /// session is left untouched.
    pub fn start_session(&mut self) -> VisitorSession {
        let persona = Persona::pick(&mut self.rng);
        log::debug!("Visitor session started as {persona}");
        VisitorSession::new(persona, self.clock.now())
    }

    /// Runs `f` with `session` as the active visitor, then hands the updated
    /// session back. Learned Q-values are shared by every session.
    pub fn in_session<T>(
        &mut self,
        session: &mut VisitorSession,
        f: impl FnOnce(&mut Self) -> T,
    ) -> T {
        std::mem::swap(&mut self.session, session);
        let out = f(self);
        std::mem::swap(&mut self.session, session);
        out
    }

    pub fn experience_len(&self) -> usize {
        self.experiences.len()
    }

    pub fn local_hour(&self) -> u32 {
        self.clock.now().with_timezone(&self.utc_offset).hour()
    }

    fn traits(&self) -> PersonaTraits {
        self.session.persona.traits()
    }

    fn tire(&mut self) {
        self.session.fatigue = (self.session.fatigue + self.config.fatigue_per_action).min(1.0);
    }

    pub fn add_fatigue(&mut self, amount: f64) {
        self.session.fatigue = (self.session.fatigue + amount).clamp(0.0, 1.0);
    }

    /// Timing stretch learned for `action` in the current state: a random
    /// nudge while exploring, otherwise a tenth of the Q-value.
    fn q_adjustment(&mut self, action: &str) -> f64 {
        if self.rng.r#gen::<f64>() < self.epsilon {
            return self.rng.gen_range(-0.2..0.2);
        }
        self.session
            .current_state
            .as_ref()
            .map(|state| self.q_value(state, action) * 0.1)
            .unwrap_or(0.0)
            .clamp(-MAX_Q_ADJUSTMENT, MAX_Q_ADJUSTMENT)
    }

    // Q-learning

    /// Row for `state`, falling back to the closest known state of the same
    /// category (nearest depth, then matching error flag).
    fn row(&self, state: &BehaviorState) -> Option<&HashMap<String, f64>> {
        if let Some(row) = self.q_table.get(&state.key()) {
            return Some(row);
        }
        self.q_table
            .iter()
            .filter_map(|(key, row)| key.parse::<BehaviorState>().ok().map(|s| (s, key, row)))
            .filter(|(known, _, _)| known.category == state.category)
            .min_by_key(|(known, key, _)| {
                (
                    known.depth.abs_diff(state.depth),
                    known.had_error != state.had_error,
                    (*key).clone(),
                )
            })
            .map(|(_, _, row)| row)
    }

    pub fn q_value(&self, state: &BehaviorState, action: &str) -> f64 {
        self.row(state)
            .and_then(|row| row.get(action).copied())
            .unwrap_or(0.0)
    }

    fn max_q(&self, state: &BehaviorState) -> f64 {
        self.row(state)
            .and_then(|row| row.values().copied().reduce(f64::max))
            .unwrap_or(0.0)
    }

    /// Epsilon-greedy choice among `actions`; ties are broken at random.
    pub fn select_action<'a>(
        &mut self,
        state: &BehaviorState,
        actions: &[&'a str],
    ) -> Option<&'a str> {
        if actions.is_empty() {
            return None;
        }
        self.session.current_state = Some(state.clone());

        if self.rng.r#gen::<f64>() < self.epsilon {
            return actions.choose(&mut self.rng).copied();
        }

        let scored: Vec<(&'a str, f64)> = actions
            .iter()
            .map(|action| (*action, self.q_value(state, action)))
            .collect();
        let best = scored
            .iter()
            .map(|(_, q)| *q)
            .fold(f64::NEG_INFINITY, f64::max);
        let leaders: Vec<&'a str> = scored
            .iter()
            .filter(|(_, q)| *q == best)
            .map(|(action, _)| *action)
            .collect();
        leaders.choose(&mut self.rng).copied()
    }

    fn update(&mut self, experience: &Experience) -> f64 {
        let key = experience.state.key();
        let current = self
            .q_table
            .get(&key)
            .and_then(|row| row.get(&experience.action))
            .copied()
            .unwrap_or(0.0);
        let future = experience
            .next_state
            .as_ref()
            .map(|next| self.config.discount_factor * self.max_q(next))
            .unwrap_or(0.0);
        let updated = current + self.config.learning_rate * (experience.reward + future - current);
        self.q_table
            .entry(key)
            .or_default()
            .insert(experience.action.clone(), updated);
        updated
    }

    /// Q-learning step towards `next_state`. Returns the new Q-value.
    pub fn learn(
        &mut self,
        state: &BehaviorState,
        action: &str,
        reward: f64,
        next_state: &BehaviorState,
    ) -> f64 {
        self.learn_experience(Experience {
            state: state.clone(),
            action: action.to_string(),
            reward,
            next_state: Some(next_state.clone()),
        })
    }

    pub fn learn_terminal(&mut self, state: &BehaviorState, action: &str, reward: f64) -> f64 {
        self.learn_experience(Experience {
            state: state.clone(),
            action: action.to_string(),
            reward,
            next_state: None,
        })
    }

    pub fn learn_experience(&mut self, experience: Experience) -> f64 {
        let old = self.q_value(&experience.state, &experience.action);
        let updated = self.update(&experience);
        log::debug!(
            "Q({}, {}) {:.3} -> {:.3} (reward {:.2})",
            experience.state,
            experience.action,
            old,
            updated,
            experience.reward
        );

        self.session.current_state = experience.next_state.clone();
        self.experiences.push_back(experience);
        while self.experiences.len() > self.config.replay_capacity {
            self.experiences.pop_front();
        }
        if self.experiences.len() > self.config.replay_threshold {
            self.replay_experiences(self.config.replay_batch);
        }

        self.epsilon = (self.epsilon * self.config.epsilon_decay).max(self.config.epsilon_min);
        updated
    }

    /// Re-applies the update rule to `n` distinct stored transitions.
    pub fn replay_experiences(&mut self, n: usize) -> usize {
        let count = n.min(self.experiences.len());
        if count == 0 {
            return 0;
        }
        let picked: Vec<Experience> =
            rand::seq::index::sample(&mut self.rng, self.experiences.len(), count)
                .into_iter()
                .filter_map(|i| self.experiences.get(i).cloned())
                .collect();
        for experience in &picked {
            self.update(experience);
        }
        picked.len()
    }

    pub fn export_q_table(&self) -> QTableSnapshot {
        QTableSnapshot {
            epsilon: self.epsilon,
            values: self
                .q_table
                .iter()
                .map(|(state, row)| {
                    let row = row.iter().map(|(a, v)| (a.clone(), *v)).collect();
                    (state.clone(), row)
                })
                .collect(),
        }
    }

    pub fn import_q_table(&mut self, snapshot: &QTableSnapshot) {
        self.q_table = snapshot
            .values
            .iter()
            .map(|(state, row)| {
                let row = row.iter().map(|(a, v)| (a.clone(), *v)).collect();
                (state.clone(), row)
            })
            .collect();
        self.epsilon = snapshot.epsilon.clamp(self.config.epsilon_min, 1.0);
    }

    pub fn reset_q_table(&mut self) {
        self.q_table.clear();
        self.experiences.clear();
        self.epsilon = self.config.epsilon;
    }

    // Timing

    /// Gamma-distributed pause before the next action of `kind`.
    ///
    /// The sample is centred on the action's delay range and keeps its right
    /// tail. Circadian energy, fatigue, the learned adjustment and the
    /// persona's pace scale it before the occasional distraction or impatience.
    /// Never shorter than [`MIN_DELAY_SECS`].
    pub fn inter_request_delay(&mut self, kind: ActionKind) -> Duration {
        let (lo, hi) = kind.delay_range();
        let sample = distributions::gamma(
            &mut self.rng,
            self.config.gamma_shape,
            self.config.gamma_scale,
        );
        let mean = self.config.gamma_shape * self.config.gamma_scale;
        let mut delay = lo + (hi - lo) * sample / (2.0 * mean);

        delay *= circadian::delay_multiplier(self.local_hour());
        delay *= 1.0 + self.session.fatigue * 0.3;
        delay /= self.traits().reading_speed;
        delay *= 1.0 + self.q_adjustment(kind.as_str());
        delay *= mood_multiplier(&mut self.rng);

        self.tire();
        Duration::from_secs_f64(delay.max(MIN_DELAY_SECS))
    }

    pub fn mouse_movement(&mut self, start: Point, target: Point) -> MousePath {
        self.tire();
        motor::mouse_path(
            &mut self.rng,
            start,
            target,
            self.config.fitts_a,
            self.config.fitts_b,
            self.config.fitts_target_width,
        )
    }

    pub fn typing_pattern(&mut self, text: &str) -> TypingPattern {
        let energy = circadian::energy_at(self.local_hour());
        let speed = energy / (1.0 + self.session.fatigue * 0.15) * self.traits().reading_speed;
        let error_scale = if self.session.persona == Persona::MobileUser {
            2.0
        } else {
            1.0
        };
        self.tire();
        motor::typing_pattern(&mut self.rng, text, speed, error_scale)
    }

    /// `words / (wpm × persona speed)` minutes plus image viewing, scaled by
    /// `1 + complexity × 0.1`, the hour of day and fatigue, then held within
    /// the persona's attention span. An empty page takes no time.
    pub fn reading_time(&mut self, metrics: PageMetrics) -> Duration {
        if metrics.word_count == 0 && metrics.image_count == 0 {
            self.tire();
            return Duration::ZERO;
        }

        let traits = self.traits();
        let words_per_minute = self.config.reading_wpm * traits.reading_speed;
        let text_secs = f64::from(metrics.word_count) / words_per_minute * 60.0;

        let (img_lo, img_hi) = if traits.reading_speed > 1.5 {
            (0.8, 3.2)
        } else {
            (2.3, 7.2)
        };
        let image_secs: f64 = (0..metrics.image_count)
            .map(|_| self.rng.gen_range(img_lo..img_hi))
            .sum();

        let complexity = 1.0 + metrics.complexity.max(0.0) * 0.1;
        let circadian = circadian::delay_multiplier(self.local_hour());
        let fatigue = 1.0 + self.session.fatigue * 0.2;
        let raw = (text_secs + image_secs) * complexity * circadian * fatigue;

        let floor = MIN_ATTENTION_SECS * traits.attention_span * self.rng.gen_range(0.65..1.35);
        let ceiling = MAX_ATTENTION_SECS * traits.attention_span * self.rng.gen_range(0.75..1.25);
        let secs = raw.min(ceiling).max(floor);

        self.tire();
        Duration::from_secs_f64(secs)
    }

    pub fn scroll_pattern(&mut self, content_height: u32) -> Vec<ScrollEvent> {
        let traits = self.traits();
        self.tire();
        motor::scroll_pattern(
            &mut self.rng,
            content_height,
            traits.scroll_speed,
            traits.attention_span,
            self.session.persona == Persona::MobileUser,
        )
    }

    // Session

    /// Counts a page view and decides whether the visitor keeps browsing.
    pub fn should_continue_browsing(&mut self) -> bool {
        self.session.pages_visited += 1;
        let pages = self.session.pages_visited;
        let traits = self.traits();

        let (min_pages, max_pages) = traits.pages_per_session;
        let target = self.rng.gen_range(min_pages..=max_pages).max(1);
        let mut chance = if pages == 1 {
            1.0 - traits.bounce_rate
        } else {
            (1.0 - f64::from(pages) / f64::from(target)).max(0.0)
        };

        chance *= circadian::energy_at(self.local_hour());
        if let Some(state) = &self.session.current_state {
            chance *= 1.0 + self.q_value(state, "continue");
        }
        let chance = chance.clamp(0.0, 1.0);

        let decision = self.rng.r#gen::<f64>() < chance;
        log::debug!(
            "Page {} as {}: continue chance {:.2} -> {}",
            pages,
            self.session.persona,
            chance,
            if decision { "continue" } else { "exit" }
        );
        decision
    }

    pub fn session_stats(&self) -> SessionStats {
        let session = &self.session;
        let duration = seconds_between(session.started_at, self.clock.now());
        SessionStats {
            persona: session.persona,
            pages_visited: session.pages_visited,
            session_duration_secs: duration,
            fatigue: session.fatigue,
            avg_time_per_page_secs: if session.pages_visited > 0 {
                duration / f64::from(session.pages_visited)
            } else {
                0.0
            },
            q_states: self.q_table.len(),
            experience_buffer_size: self.experiences.len(),
            epsilon: self.epsilon,
        }
    }

    /// Starts a new visitor session: fatigue and page count reset and a new
    /// persona is drawn. Learned values are kept.
    pub fn reset_session(&mut self) {
        self.session = self.start_session();
        log::info!("Behaviour session reset with persona {}", self.session.persona);
    }
}

impl Default for BehaviorEngine {
    fn default() -> Self {
        Self::new(BehaviorConfig::default())
    }
}

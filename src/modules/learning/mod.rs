//! Reusable reinforcement-learning utilities.
//!
//! [`QLearningCoordinator`] is a string-keyed Q-table with Q-learning and
//! SARSA updates, experience replay and decaying exploration. It is
//! independent of the behaviour engine's own table and can drive any
//! discrete decision (retry strategy, crawl ordering, ...). [`ProfileBandit`]
//! picks identities with UCB1.

mod bandit;

pub use bandit::{ArmStats, ProfileBandit};

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::config::LearningConfig;

#[derive(Debug, Error)]
pub enum LearningError {
    #[error("policy I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("policy is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type LearningResult<T> = Result<T, LearningError>;

/// Observed result of one action, scored by
/// [`QLearningCoordinator::calculate_reward`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Outcome {
    pub success: bool,
    pub detected: bool,
    pub banned: bool,
    pub response_time: Option<Duration>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn with_response_time(mut self, elapsed: Duration) -> Self {
        self.response_time = Some(elapsed);
        self
    }
}

/// Stored transition for replay. `done` marks terminal steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: String,
    pub action: String,
    pub reward: f64,
    pub next_state: String,
    pub done: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct QEntry {
    value: f64,
    visits: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub state: String,
    pub action: String,
    pub q_value: f64,
    pub visits: u64,
}

/// Exported policy, stable-ordered so diffs between exports are readable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub learning_rate: f64,
    pub discount_factor: f64,
    pub epsilon: f64,
    pub entries: Vec<PolicyEntry>,
}

#[derive(Debug)]
pub struct QLearningCoordinator {
    config: LearningConfig,
    q_table: HashMap<String, HashMap<String, QEntry>>,
    experiences: VecDeque<Transition>,
    learning_rate: f64,
    discount_factor: f64,
    epsilon: f64,
    rng: StdRng,
}

impl QLearningCoordinator {
    pub fn new(config: LearningConfig) -> Self {
        Self::from_rng(config, StdRng::from_entropy())
    }

    pub fn with_seed(config: LearningConfig, seed: u64) -> Self {
        Self::from_rng(config, StdRng::seed_from_u64(seed))
    }

    fn from_rng(config: LearningConfig, rng: StdRng) -> Self {
        Self {
            learning_rate: config.learning_rate,
            discount_factor: config.discount_factor,
            epsilon: config.epsilon,
            q_table: HashMap::new(),
            experiences: VecDeque::new(),
            config,
            rng,
        }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn set_epsilon(&mut self, epsilon: f64) {
        self.epsilon = epsilon.clamp(0.0, 1.0);
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate.clamp(0.0, 1.0);
    }

    pub fn discount_factor(&self) -> f64 {
        self.discount_factor
    }

    pub fn set_discount_factor(&mut self, discount_factor: f64) {
        self.discount_factor = discount_factor.clamp(0.0, 1.0);
    }

    pub fn q_value(&self, state: &str, action: &str) -> f64 {
        self.entry(state, action).value
    }

    /// Number of times the pair has been updated.
    pub fn visits(&self, state: &str, action: &str) -> u64 {
        self.entry(state, action).visits
    }

    fn entry(&self, state: &str, action: &str) -> QEntry {
        self.q_table
            .get(state)
            .and_then(|row| row.get(action))
            .copied()
            .unwrap_or_default()
    }

    fn max_q(&self, state: &str) -> f64 {
        self.q_table
            .get(state)
            .and_then(|row| row.values().map(|e| e.value).reduce(f64::max))
            .unwrap_or(0.0)
    }

    fn apply(&mut self, state: &str, action: &str, target: f64) -> f64 {
        let alpha = self.learning_rate;
        let entry = self
            .q_table
            .entry(state.to_string())
            .or_default()
            .entry(action.to_string())
            .or_default();
        entry.value += alpha * (target - entry.value);
        entry.visits += 1;
        entry.value
    }

    /// Off-policy update: `Q += α(r + γ·max Q(s') − Q)`.
    pub fn update_q_value(&mut self, state: &str, action: &str, reward: f64, next_state: &str) -> f64 {
        let target = reward + self.discount_factor * self.max_q(next_state);
        let updated = self.apply(state, action, target);
        log::debug!("Q-learning {state}/{action}: reward {reward:.2} -> {updated:.3}");
        updated
    }

    /// On-policy update using the action actually taken next.
    pub fn update_sarsa(
        &mut self,
        state: &str,
        action: &str,
        reward: f64,
        next_state: &str,
        next_action: &str,
    ) -> f64 {
        let target = reward + self.discount_factor * self.q_value(next_state, next_action);
        let updated = self.apply(state, action, target);
        log::debug!("SARSA {state}/{action} -> {next_action}: reward {reward:.2} -> {updated:.3}");
        updated
    }

    fn update_terminal(&mut self, state: &str, action: &str, reward: f64) -> f64 {
        self.apply(state, action, reward)
    }

    /// Highest-valued action; earlier entries win ties.
    pub fn best_action<'a>(&self, state: &str, actions: &[&'a str]) -> Option<&'a str> {
        let mut best: Option<(&'a str, f64)> = None;
        for action in actions {
            let q = self.q_value(state, action);
            if best.is_none_or(|(_, top)| q > top) {
                best = Some((*action, q));
            }
        }
        best.map(|(action, _)| action)
    }

    /// Epsilon-greedy selection.
    pub fn select_action<'a>(&mut self, state: &str, actions: &[&'a str]) -> Option<&'a str> {
        if self.rng.r#gen::<f64>() < self.epsilon {
            actions.choose(&mut self.rng).copied()
        } else {
            self.best_action(state, actions)
        }
    }

    pub fn calculate_reward(outcome: &Outcome) -> f64 {
        let mut reward = 0.0;
        if outcome.success {
            reward += 10.0;
        }
        if let Some(elapsed) = outcome.response_time {
            reward += (5.0 - elapsed.as_secs_f64()).max(0.0);
        }
        if outcome.detected {
            reward -= 20.0;
        }
        if outcome.banned {
            reward -= 50.0;
        }
        reward
    }

    pub fn decay_epsilon(&mut self) {
        self.decay_epsilon_with(self.config.epsilon_decay, self.config.epsilon_min);
    }

    pub fn decay_epsilon_with(&mut self, decay: f64, floor: f64) {
        self.epsilon = (self.epsilon * decay).max(floor);
    }

    pub fn decay_learning_rate(&mut self) {
        self.decay_learning_rate_with(
            self.config.learning_rate_decay,
            self.config.learning_rate_min,
        );
    }

    pub fn decay_learning_rate_with(&mut self, decay: f64, floor: f64) {
        self.learning_rate = (self.learning_rate * decay).max(floor);
    }

    pub fn state_action_count(&self) -> usize {
        self.q_table.values().map(HashMap::len).sum()
    }

    pub fn store_experience(&mut self, transition: Transition) {
        self.experiences.push_back(transition);
        while self.experiences.len() > self.config.replay_capacity {
            self.experiences.pop_front();
        }
    }

    pub fn experience_count(&self) -> usize {
        self.experiences.len()
    }

    /// Re-applies Q-learning to up to `batch` distinct stored transitions.
    pub fn replay_experiences(&mut self, batch: usize) -> usize {
        let count = batch.min(self.experiences.len());
        if count == 0 {
            return 0;
        }
        let picked: Vec<Transition> =
            rand::seq::index::sample(&mut self.rng, self.experiences.len(), count)
                .into_iter()
                .filter_map(|i| self.experiences.get(i).cloned())
                .collect();
        for t in &picked {
            if t.done {
                self.update_terminal(&t.state, &t.action, t.reward);
            } else {
                self.update_q_value(&t.state, &t.action, t.reward, &t.next_state);
            }
        }
        picked.len()
    }

    pub fn export(&self) -> PolicySnapshot {
        let mut entries: Vec<PolicyEntry> = self
            .q_table
            .iter()
            .flat_map(|(state, row)| {
                row.iter().map(move |(action, entry)| PolicyEntry {
                    state: state.clone(),
                    action: action.clone(),
                    q_value: entry.value,
                    visits: entry.visits,
                })
            })
            .collect();
        entries.sort_by(|a, b| (&a.state, &a.action).cmp(&(&b.state, &b.action)));

        PolicySnapshot {
            learning_rate: self.learning_rate,
            discount_factor: self.discount_factor,
            epsilon: self.epsilon,
            entries,
        }
    }

    /// Replaces the table and rates with `snapshot`.
    pub fn import(&mut self, snapshot: &PolicySnapshot) {
        self.q_table.clear();
        for entry in &snapshot.entries {
            self.q_table
                .entry(entry.state.clone())
                .or_default()
                .insert(
                    entry.action.clone(),
                    QEntry {
                        value: entry.q_value,
                        visits: entry.visits,
                    },
                );
        }
        self.set_learning_rate(snapshot.learning_rate);
        self.set_discount_factor(snapshot.discount_factor);
        self.set_epsilon(snapshot.epsilon);
        log::info!("Imported policy with {} state-action pairs", snapshot.entries.len());
    }

    pub fn save_policy(&self, path: impl AsRef<Path>) -> LearningResult<()> {
        let json = serde_json::to_string_pretty(&self.export())?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Loads a policy written by [`save_policy`](Self::save_policy). The
    /// current table is untouched on error.
    pub fn load_policy(&mut self, path: impl AsRef<Path>) -> LearningResult<()> {
        let raw = fs::read_to_string(path)?;
        let snapshot: PolicySnapshot = serde_json::from_str(&raw)?;
        self.import(&snapshot);
        Ok(())
    }

    /// Forgets everything learned and restores configured rates.
    pub fn reset(&mut self) {
        self.q_table.clear();
        self.experiences.clear();
        self.learning_rate = self.config.learning_rate;
        self.discount_factor = self.config.discount_factor;
        self.epsilon = self.config.epsilon;
    }
}

impl Default for QLearningCoordinator {
    fn default() -> Self {
        Self::new(LearningConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn learner() -> QLearningCoordinator {
        QLearningCoordinator::with_seed(LearningConfig::default(), 9)
    }

    #[test]
    fn q_learning_update() {
        let mut learner = learner();
        let q = learner.update_q_value("page_loaded", "extract", 10.0, "extracted");
        assert!((q - 1.0).abs() < 1e-9);
        let again = learner.update_q_value("page_loaded", "extract", 10.0, "extracted");
        assert!(again > 1.0);
        assert_eq!(learner.visits("page_loaded", "extract"), 2);

        assert!(learner.update_q_value("detected", "continue", -20.0, "banned") < 0.0);
        assert_eq!(learner.q_value("unseen", "unseen"), 0.0);
    }

    #[test]
    fn q_values_converge() {
        let mut learner = learner();
        let values: Vec<f64> = (0..100)
            .map(|_| learner.update_q_value("start", "go", 10.0, "done"))
            .collect();
        let early = (values[10] - values[9]).abs();
        let late = (values[99] - values[98]).abs();
        assert!(late < early);
    }

    #[test]
    fn sarsa_uses_taken_action() {
        let mut learner = learner();
        learner.update_q_value("s2", "best", 10.0, "s3");
        learner.update_q_value("s2", "taken", 5.0, "s3");

        let mut other = self::learner();
        other.import(&learner.export());

        let q_learning = learner.update_q_value("s1", "a", 10.0, "s2");
        let sarsa = other.update_sarsa("s1", "a", 10.0, "s2", "taken");
        assert!(q_learning > sarsa);
    }

    #[test]
    fn selection_respects_epsilon() {
        let mut learner = learner();
        learner.update_q_value("s", "best", 20.0, "next");
        learner.update_q_value("s", "worse", 5.0, "next");

        learner.set_epsilon(0.0);
        for _ in 0..10 {
            assert_eq!(learner.select_action("s", &["best", "worse"]), Some("best"));
        }

        learner.set_epsilon(1.0);
        let picks: std::collections::HashSet<_> = (0..100)
            .filter_map(|_| learner.select_action("s", &["best", "worse", "third"]))
            .collect();
        assert!(picks.len() > 1);
        assert_eq!(learner.select_action("s", &[]), None);
    }

    #[test]
    fn import_restores_discount_factor() {
        let mut source = learner();
        source.set_discount_factor(0.5);
        source.update_q_value("s", "a", 10.0, "n");
        let snapshot = source.export();
        assert_eq!(snapshot.discount_factor, 0.5);

        let mut target = learner();
        assert_eq!(target.discount_factor(), 0.95);
        target.import(&snapshot);
        assert_eq!(target.discount_factor(), 0.5);

        // Same table and rates, so the next update agrees exactly.
        let a = source.update_q_value("p", "b", 1.0, "s");
        let b = target.update_q_value("p", "b", 1.0, "s");
        assert!((a - b).abs() < 1e-12);

        target.import(&PolicySnapshot {
            discount_factor: 4.0,
            ..snapshot
        });
        assert_eq!(target.discount_factor(), 1.0);

        target.reset();
        assert_eq!(target.discount_factor(), 0.95);
    }

    #[test]
    fn best_action_picks_highest() {
        let mut learner = learner();
        learner.update_q_value("s", "a1", 5.0, "n");
        learner.update_q_value("s", "a2", 15.0, "n");
        learner.update_q_value("s", "a3", 10.0, "n");
        assert_eq!(learner.best_action("s", &["a1", "a2", "a3"]), Some("a2"));
        assert_eq!(learner.state_action_count(), 3);
    }

    #[test]
    fn rewards() {
        let reward = QLearningCoordinator::calculate_reward;
        assert_eq!(reward(&Outcome::success()), 10.0);
        assert_eq!(
            reward(&Outcome {
                detected: true,
                ..Outcome::default()
            }),
            -20.0
        );
        assert_eq!(
            reward(&Outcome::success().with_response_time(Duration::from_secs(2))),
            13.0
        );
        assert_eq!(
            reward(&Outcome::default().with_response_time(Duration::from_secs(9))),
            0.0
        );
        assert_eq!(
            reward(&Outcome {
                detected: true,
                banned: true,
                ..Outcome::default()
            }),
            -70.0
        );
    }

    #[test]
    fn decays_stop_at_floor() {
        let mut learner = learner();
        learner.set_epsilon(0.05);
        for _ in 0..1000 {
            learner.decay_epsilon_with(0.99, 0.01);
        }
        assert!((learner.epsilon() - 0.01).abs() < 1e-12);

        learner.set_learning_rate(0.1);
        learner.decay_learning_rate_with(0.9, 0.001);
        assert!((learner.learning_rate() - 0.09).abs() < 1e-12);
        for _ in 0..1000 {
            learner.decay_learning_rate();
        }
        assert!((learner.learning_rate() - 0.001).abs() < 1e-12);
    }

    #[test]
    fn replay_is_bounded_and_updates() {
        let config = LearningConfig {
            replay_capacity: 20,
            ..LearningConfig::default()
        };
        let mut learner = QLearningCoordinator::with_seed(config, 1);
        assert_eq!(learner.replay_experiences(5), 0);

        for i in 0..50 {
            learner.store_experience(Transition {
                state: format!("s{i}"),
                action: "a".into(),
                reward: 10.0,
                next_state: format!("n{i}"),
                done: false,
            });
        }
        assert_eq!(learner.experience_count(), 20);
        assert_eq!(learner.replay_experiences(8), 8);
        assert_eq!(learner.state_action_count(), 8);
        assert_eq!(learner.replay_experiences(100), 20);
    }

    #[test]
    fn policy_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");

        let mut learner = learner();
        learner.update_q_value("s1", "a1", 10.0, "n1");
        learner.save_policy(&path).unwrap();

        let mut fresh = self::learner();
        fresh.load_policy(&path).unwrap();
        assert_eq!(fresh.q_value("s1", "a1"), learner.q_value("s1", "a1"));
        assert_eq!(fresh.export(), learner.export());

        assert!(matches!(
            fresh.load_policy(dir.path().join("missing.json")),
            Err(LearningError::Io(_))
        ));
        fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        assert!(matches!(
            fresh.load_policy(dir.path().join("bad.json")),
            Err(LearningError::Json(_))
        ));
        assert_eq!(fresh.state_action_count(), 1);

        fresh.reset();
        assert_eq!(fresh.state_action_count(), 0);
        assert_eq!(fresh.epsilon(), LearningConfig::default().epsilon);
    }
}

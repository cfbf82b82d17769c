use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ArmStats {
    pub pulls: u64,
    pub total_reward: f64,
}

impl ArmStats {
    pub fn average(&self) -> f64 {
        if self.pulls == 0 {
            0.0
        } else {
            self.total_reward / self.pulls as f64
        }
    }
}

/// UCB1 selection over profile ids.
///
/// Arms that were never pulled are always tried first, in the order given.
/// After that the arm maximising `avg + sqrt(2·ln(total) / pulls)` wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileBandit {
    arms: HashMap<String, ArmStats>,
    total_pulls: u64,
}

impl ProfileBandit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select<'a>(&self, candidates: &[&'a str]) -> Option<&'a str> {
        if let Some(fresh) = candidates.iter().find(|id| self.pulls(id) == 0) {
            return Some(*fresh);
        }

        let mut best: Option<(&'a str, f64)> = None;
        for id in candidates {
            let score = self.ucb_score(id).unwrap_or(f64::INFINITY);
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((*id, score));
            }
        }
        best.map(|(id, _)| id)
    }

    /// `None` for an arm that has never been pulled.
    pub fn ucb_score(&self, id: &str) -> Option<f64> {
        let stats = self.arms.get(id).filter(|s| s.pulls > 0)?;
        let total = self.total_pulls.max(1) as f64;
        let bonus = (2.0 * total.ln() / stats.pulls as f64).sqrt();
        Some(stats.average() + bonus)
    }

    pub fn record(&mut self, id: &str, reward: f64) {
        let stats = self.arms.entry(id.to_string()).or_default();
        stats.pulls += 1;
        stats.total_reward += reward;
        self.total_pulls += 1;
    }

    pub fn pulls(&self, id: &str) -> u64 {
        self.arms.get(id).map(|s| s.pulls).unwrap_or(0)
    }

    pub fn average_reward(&self, id: &str) -> f64 {
        self.arms.get(id).map(ArmStats::average).unwrap_or(0.0)
    }

    pub fn stats(&self, id: &str) -> Option<ArmStats> {
        self.arms.get(id).copied()
    }

    pub fn total_pulls(&self) -> u64 {
        self.total_pulls
    }

    /// Drops an arm (e.g. a banned profile). Its pulls stay in the total.
    pub fn remove(&mut self, id: &str) -> Option<ArmStats> {
        self.arms.remove(id)
    }
}

//! Profile lifecycle management.
//!
//! A [`Profile`] is a persisted synthetic identity. The [`ProfileSelector`]
//! picks the healthiest usable profile (or creates one), folds outcome reports
//! into its success rate, bans identities that fall below the threshold and
//! scores how likely a profile is to be flagged.

mod risk;

pub use risk::{DetectionRisk, RiskLevel, RiskReasons};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::config::ProfileConfig;
use crate::modules::clock::{SharedClock, seconds_between, system_clock};
use crate::modules::events::{BanEvent, CleanupEvent, EventDispatcher, ProfileEvent, StealthEvent};
use crate::modules::spoofing::{Fingerprint, FingerprintGenerator};
use crate::modules::store::{ProfileStore, StoreError};

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile store error: {0}")]
    Store(#[from] StoreError),
    #[error("profile {0} not found")]
    NotFound(String),
    #[error("profile artifact error: {0}")]
    Artifact(#[from] std::io::Error),
}

pub type ProfileResult<T> = Result<T, ProfileError>;

/// Persisted identity with usage and health counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub fingerprint: Fingerprint,
    pub usage_count: u64,
    /// Percentage in `0..=100`.
    pub success_rate: f64,
    /// Number of outcome reports folded into `success_rate`.
    pub outcome_count: u64,
    pub banned: bool,
    pub last_used: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub artifact_path: Option<PathBuf>,
}

impl Profile {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        fingerprint: Fingerprint,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            fingerprint,
            usage_count: 0,
            success_rate: 100.0,
            outcome_count: 0,
            banned: false,
            last_used: now,
            created_at: now,
            artifact_path: None,
        }
    }

    /// Folds one outcome into the running success rate.
    pub fn record_outcome(&mut self, success: bool) {
        let n = self.outcome_count as f64;
        let prior_successes = n * self.success_rate / 100.0;
        let successes = prior_successes + if success { 1.0 } else { 0.0 };
        self.success_rate = (successes / (n + 1.0) * 100.0).clamp(0.0, 100.0);
        self.outcome_count += 1;
    }
}

/// Ephemeral binding of a crawl run to a profile.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: String,
    pub profile_name: String,
    pub profile: Profile,
    pub fingerprint: Fingerprint,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileStats {
    pub total_profiles: usize,
    pub active_profiles: usize,
    pub banned_profiles: usize,
    pub avg_success_rate: f64,
    pub avg_usage_count: f64,
}

/// Chooses, creates and maintains profiles on top of a [`ProfileStore`].
#[derive(Debug, Clone)]
pub struct ProfileSelector {
    store: Arc<dyn ProfileStore>,
    generator: Arc<Mutex<FingerprintGenerator>>,
    config: ProfileConfig,
    clock: SharedClock,
    events: EventDispatcher,
}

impl ProfileSelector {
    pub fn new(store: Arc<dyn ProfileStore>, config: ProfileConfig) -> Self {
        Self {
            store,
            generator: Arc::new(Mutex::new(FingerprintGenerator::new())),
            config,
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

    pub fn with_generator(mut self, generator: FingerprintGenerator) -> Self {
        self.generator = Arc::new(Mutex::new(generator));
        self
    }

    pub fn config(&self) -> &ProfileConfig {
        &self.config
    }

    pub fn profile(&self, id: &str) -> ProfileResult<Option<Profile>> {
        Ok(self.store.get(id)?)
    }

    pub fn profiles(&self) -> ProfileResult<Vec<Profile>> {
        Ok(self.store.list()?)
    }

    /// Returns the best usable profile, creating a new one when none qualifies
    /// or when `force_new` is set.
    pub fn get_profile(&self, force_new: bool) -> ProfileResult<Profile> {
        if force_new {
            return self.create_profile();
        }

        let candidates = match self.usable_profiles() {
            Ok(candidates) => candidates,
            Err(err) => {
                log::warn!("Failed to query available profiles: {err}");
                Vec::new()
            }
        };

        // The listing may be stale; `mark_used` re-checks under the store lock.
        for candidate in candidates {
            match self.mark_used(&candidate.id) {
                Ok(Some(updated)) => {
                    log::debug!(
                        "Profile {} selected (usage {}, success {:.1}%)",
                        updated.id,
                        updated.usage_count,
                        updated.success_rate
                    );
                    return Ok(updated);
                }
                Ok(None) => continue,
                Err(err) => {
                    log::warn!("Failed to update usage of profile {}: {err}", candidate.id);
                }
            }
        }

        self.create_profile()
    }

    fn is_usable(&self, profile: &Profile) -> bool {
        !profile.banned
            && profile.success_rate > self.config.ban_threshold * 100.0
            && profile.usage_count < self.config.rotation_after
    }

    /// Claims one use of the profile: bumps usage and recency if it is still
    /// usable. `None` when the id is unknown or the profile is no longer
    /// usable.
    pub fn mark_used(&self, id: &str) -> ProfileResult<Option<Profile>> {
        let now = self.clock.now();
        let mut claimed = false;
        let updated = self.store.update(id, &mut |profile| {
            if self.is_usable(profile) {
                profile.usage_count += 1;
                profile.last_used = now;
                claimed = true;
            }
        })?;
        Ok(updated.filter(|_| claimed))
    }

    /// Profiles eligible for selection, best first: not banned, above the
    /// ban threshold and below the rotation limit.
    pub fn usable_profiles(&self) -> ProfileResult<Vec<Profile>> {
        let mut usable: Vec<Profile> = self
            .store
            .list()?
            .into_iter()
            .filter(|p| self.is_usable(p))
            .collect();

        usable.sort_by(|a, b| {
            b.success_rate
                .total_cmp(&a.success_rate)
                .then_with(|| a.usage_count.cmp(&b.usage_count))
                .then_with(|| a.last_used.cmp(&b.last_used))
        });

        Ok(usable)
    }

    fn create_profile(&self) -> ProfileResult<Profile> {
        let now = self.clock.now();
        let suffix: u32 = rand::thread_rng().r#gen();
        let name = format!("profile_{}_{suffix:08x}", now.timestamp());
        let id = random_hex(8);

        let fingerprint = self
            .generator
            .lock()
            .expect("fingerprint generator lock poisoned")
            .generate_at(now);

        let mut profile = Profile::new(id, name, fingerprint, now);

        if let Some(root) = &self.config.artifact_root {
            let path = root.join(&profile.name);
            std::fs::create_dir_all(&path).map_err(|err| {
                log::error!("Failed to create profile directory {}: {err}", path.display());
                err
            })?;
            profile.artifact_path = Some(path);
        }

        self.store.insert(&profile).map_err(|err| {
            log::error!("Failed to create profile {}: {err}", profile.name);
            err
        })?;

        self.events.dispatch(StealthEvent::ProfileCreated(ProfileEvent {
            profile_id: profile.id.clone(),
            name: profile.name.clone(),
            timestamp: now,
        }));
        Ok(profile)
    }

    /// Records one outcome and bans the profile when it falls below the
    /// threshold. Returns the new success rate, or `None` when the profile is
    /// unknown or the store could not be updated.
    pub fn update_profile_success(&self, id: &str, success: bool) -> Option<f64> {
        let floor = self.config.ban_threshold * 100.0;
        let mut newly_banned = false;

        let updated = self.store.update(id, &mut |profile| {
            profile.record_outcome(success);
            if profile.success_rate < floor && !profile.banned {
                profile.banned = true;
                newly_banned = true;
            }
        });

        match updated {
            Ok(Some(profile)) => {
                log::debug!(
                    "Profile {} success rate now {:.2}% (success={success})",
                    profile.id,
                    profile.success_rate
                );
                if newly_banned {
                    self.emit_ban(&profile);
                }
                Some(profile.success_rate)
            }
            Ok(None) => {
                log::debug!("Outcome for unknown profile {id} ignored");
                None
            }
            Err(err) => {
                log::warn!("Failed to update profile success for {id}: {err}");
                None
            }
        }
    }

    pub fn ban_profile(&self, id: &str) -> ProfileResult<()> {
        let mut newly_banned = false;
        let profile = self
            .store
            .update(id, &mut |profile| {
                newly_banned = !profile.banned;
                profile.banned = true;
            })?
            .ok_or_else(|| ProfileError::NotFound(id.to_string()))?;

        if newly_banned {
            self.emit_ban(&profile);
        }
        Ok(())
    }

    fn emit_ban(&self, profile: &Profile) {
        self.events.dispatch(StealthEvent::ProfileBanned(BanEvent {
            profile_id: profile.id.clone(),
            success_rate: profile.success_rate,
            timestamp: self.clock.now(),
        }));
    }

    /// Replaces the fingerprint; counters are kept.
    pub fn rotate_fingerprint(&self, id: &str) -> ProfileResult<Fingerprint> {
        let now = self.clock.now();
        let fingerprint = self
            .generator
            .lock()
            .expect("fingerprint generator lock poisoned")
            .generate_at(now);

        let replacement = fingerprint.clone();
        let profile = self
            .store
            .update(id, &mut |profile| profile.fingerprint = replacement.clone())?
            .ok_or_else(|| ProfileError::NotFound(id.to_string()))?;

        self.events
            .dispatch(StealthEvent::FingerprintRotated(ProfileEvent {
                profile_id: profile.id.clone(),
                name: profile.name.clone(),
                timestamp: now,
            }));
        Ok(fingerprint)
    }

    pub fn assess_detection_risk(&self, id: &str) -> DetectionRisk {
        match self.store.get(id) {
            Ok(Some(profile)) => {
                let hours = seconds_between(profile.last_used, self.clock.now()) / 3600.0;
                DetectionRisk::assess(&profile, hours, &self.config.risk)
            }
            Ok(None) => DetectionRisk::unknown(),
            Err(err) => {
                log::warn!("Failed to load profile {id} for risk assessment: {err}");
                DetectionRisk::unknown()
            }
        }
    }

    /// Deletes profiles idle for longer than `older_than_days` together with
    /// their artifact directories.
    pub fn cleanup(&self, older_than_days: u32) -> ProfileResult<usize> {
        let now = self.clock.now();
        let cutoff = now - chrono::Duration::days(i64::from(older_than_days));

        let mut removed = 0;
        for profile in self.store.list()? {
            if profile.last_used >= cutoff {
                continue;
            }
            if let Some(path) = &profile.artifact_path
                && path.is_dir()
                && let Err(err) = std::fs::remove_dir_all(path)
            {
                log::warn!("Failed to remove profile directory {}: {err}", path.display());
            }
            if self.store.delete(&profile.id)? {
                removed += 1;
            }
        }

        self.events.dispatch(StealthEvent::ProfilesCleaned(CleanupEvent {
            removed,
            older_than_days,
            timestamp: now,
        }));
        Ok(removed)
    }

    pub fn stats(&self) -> ProfileResult<ProfileStats> {
        let profiles = self.store.list()?;
        if profiles.is_empty() {
            return Ok(ProfileStats::default());
        }

        let total = profiles.len();
        let banned = profiles.iter().filter(|p| p.banned).count();
        let rate_sum: f64 = profiles.iter().map(|p| p.success_rate).sum();
        let usage_sum: u64 = profiles.iter().map(|p| p.usage_count).sum();

        Ok(ProfileStats {
            total_profiles: total,
            active_profiles: total - banned,
            banned_profiles: banned,
            avg_success_rate: rate_sum / total as f64,
            avg_usage_count: usage_sum as f64 / total as f64,
        })
    }

    /// Binds a new crawl run to the best available profile.
    pub fn create_session(&self, profile_name: &str) -> ProfileResult<Session> {
        let profile = self.get_profile(false)?;
        Ok(Session {
            session_id: random_hex(16),
            profile_name: profile_name.to_string(),
            fingerprint: profile.fingerprint.clone(),
            profile,
            created_at: self.clock.now(),
        })
    }
}

fn random_hex(bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..bytes)
        .map(|_| format!("{:02x}", rng.r#gen::<u8>()))
        .collect()
}

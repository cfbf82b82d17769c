//! Policy events.
//!
//! Bans, rate reductions, recoveries, rotations and cleanups are not errors;
//! components broadcast them here so hosts can react or audit.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileEvent {
    pub profile_id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BanEvent {
    pub profile_id: String,
    pub success_rate: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateChangeEvent {
    pub domain: String,
    pub status: Option<u16>,
    pub adjustment_factor: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CleanupEvent {
    pub removed: usize,
    pub older_than_days: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StealthEvent {
    ProfileCreated(ProfileEvent),
    ProfileBanned(BanEvent),
    FingerprintRotated(ProfileEvent),
    RateReduced(RateChangeEvent),
    RateRecovered(RateChangeEvent),
    ProfilesCleaned(CleanupEvent),
}

impl StealthEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StealthEvent::ProfileCreated(_) => "profile_created",
            StealthEvent::ProfileBanned(_) => "profile_banned",
            StealthEvent::FingerprintRotated(_) => "fingerprint_rotated",
            StealthEvent::RateReduced(_) => "rate_reduced",
            StealthEvent::RateRecovered(_) => "rate_recovered",
            StealthEvent::ProfilesCleaned(_) => "profiles_cleaned",
        }
    }
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &StealthEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
///
/// Cloning shares the handler list.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher with a [`LoggingHandler`] already registered.
    pub fn with_logging() -> Self {
        let dispatcher = Self::new();
        dispatcher.register_handler(Arc::new(LoggingHandler));
        dispatcher
    }

    pub fn register_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .expect("event handler lock poisoned")
            .push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .map(|handlers| handlers.len())
            .unwrap_or(0)
    }

    pub fn dispatch(&self, event: StealthEvent) {
        let handlers = self
            .handlers
            .read()
            .expect("event handler lock poisoned")
            .clone();
        for handler in &handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &StealthEvent) {
        match event {
            StealthEvent::ProfileCreated(created) => {
                log::info!("profile {} ({}) created", created.profile_id, created.name);
            }
            StealthEvent::ProfileBanned(ban) => {
                log::warn!(
                    "profile {} banned at {:.1}% success",
                    ban.profile_id,
                    ban.success_rate
                );
            }
            StealthEvent::FingerprintRotated(rotated) => {
                log::info!("profile {} fingerprint rotated", rotated.profile_id);
            }
            StealthEvent::RateReduced(change) => {
                log::warn!(
                    "rate for {} reduced (status {:?}) -> factor {:.3}",
                    change.domain,
                    change.status,
                    change.adjustment_factor
                );
            }
            StealthEvent::RateRecovered(change) => {
                log::info!(
                    "rate for {} recovered -> factor {:.3}",
                    change.domain,
                    change.adjustment_factor
                );
            }
            StealthEvent::ProfilesCleaned(cleanup) => {
                log::info!(
                    "removed {} profiles idle for more than {} days",
                    cleanup.removed,
                    cleanup.older_than_days
                );
            }
        }
    }
}

/// Keeps every event it receives; handy for audits and tests.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<StealthEvent>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StealthEvent> {
        self.events.lock().expect("recorder lock poisoned").clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events
            .lock()
            .expect("recorder lock poisoned")
            .iter()
            .filter(|event| event.kind() == kind)
            .count()
    }
}

impl EventHandler for EventRecorder {
    fn handle(&self, event: &StealthEvent) {
        self.events
            .lock()
            .expect("recorder lock poisoned")
            .push(event.clone());
    }
}

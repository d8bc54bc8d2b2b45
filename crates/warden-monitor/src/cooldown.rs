//! Cooldown suppression with tier escalation.
//!
//! After an alert for `(monitor_id, key)`, further alerts at the same or a
//! lower tier are suppressed until the cooldown elapses. A strictly higher
//! tier always goes through and re-arms the cooldown at the new tier.
//!
//! Each key has its own slot lock; the map lock is only held to find or
//! insert a slot, so decisions for different keys never wait on each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use warden_alerts::AlertSeverity;

use crate::tracker::{TrackKey, to_delta};

/// Last alert emitted for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownState {
    /// When the alert was emitted.
    pub last_alert_at: DateTime<Utc>,
    /// Tier index of that alert.
    pub last_tier: usize,
    /// Severity of that alert.
    pub last_severity: AlertSeverity,
}

impl CooldownState {
    /// Returns true if `cooldown` has fully elapsed at `now`.
    #[must_use]
    pub fn is_expired(&self, cooldown: Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_alert_at) >= to_delta(cooldown)
    }
}

/// Persisted form of one cooldown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownEntry {
    /// Owning monitor.
    pub monitor_id: String,
    /// Tracked key.
    pub key: String,
    /// Cooldown state.
    #[serde(flatten)]
    pub state: CooldownState,
}

type Slot = Arc<Mutex<Option<CooldownState>>>;

/// Decides whether a crossed tier may alert.
#[derive(Debug, Default)]
pub struct CooldownManager {
    slots: RwLock<HashMap<TrackKey, Slot>>,
}

impl CooldownManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, monitor_id: &str, key: &str) -> Slot {
        let track_key = (monitor_id.to_string(), key.to_string());
        if let Some(slot) = self.slots.read().get(&track_key) {
            return Arc::clone(slot);
        }
        Arc::clone(self.slots.write().entry(track_key).or_default())
    }

    fn existing(&self, monitor_id: &str, key: &str) -> Option<Slot> {
        self.slots
            .read()
            .get(&(monitor_id.to_string(), key.to_string()))
            .map(Arc::clone)
    }

    fn decide(state: Option<&CooldownState>, tier: usize, cooldown: Duration, now: DateTime<Utc>) -> bool {
        match state {
            None => true,
            Some(state) => tier > state.last_tier || state.is_expired(cooldown, now),
        }
    }

    /// Returns true if an alert at `tier` is allowed at `now`.
    pub fn should_alert(
        &self,
        monitor_id: &str,
        key: &str,
        tier: usize,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        let state = self.get(monitor_id, key);
        Self::decide(state.as_ref(), tier, cooldown, now)
    }

    /// Records that an alert was emitted.
    ///
    /// Only called for alerts that actually went out, so a suppressed
    /// downgrade never moves the clock.
    pub fn record_alert(
        &self,
        monitor_id: &str,
        key: &str,
        tier: usize,
        severity: AlertSeverity,
        at: DateTime<Utc>,
    ) {
        *self.slot(monitor_id, key).lock() = Some(CooldownState {
            last_alert_at: at,
            last_tier: tier,
            last_severity: severity,
        });
    }

    /// Checks and records in one step.
    ///
    /// Returns true (and records the alert) if it is allowed. Only the
    /// key's own slot is locked while deciding.
    pub fn try_acquire(
        &self,
        monitor_id: &str,
        key: &str,
        tier: usize,
        severity: AlertSeverity,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        let slot = self.slot(monitor_id, key);
        let mut state = slot.lock();
        if !Self::decide(state.as_ref(), tier, cooldown, now) {
            return false;
        }
        *state = Some(CooldownState {
            last_alert_at: now,
            last_tier: tier,
            last_severity: severity,
        });
        true
    }

    /// Returns the current state for a key.
    pub fn get(&self, monitor_id: &str, key: &str) -> Option<CooldownState> {
        self.existing(monitor_id, key).and_then(|slot| *slot.lock())
    }

    /// Time left before same-tier alerts are allowed again, if any.
    pub fn remaining(
        &self,
        monitor_id: &str,
        key: &str,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        let state = self.get(monitor_id, key)?;
        let elapsed = now.signed_duration_since(state.last_alert_at);
        let left = to_delta(cooldown).checked_sub(&elapsed)?;
        left.to_std().ok().filter(|d| !d.is_zero())
    }

    /// Drops expired cooldowns and cooldowns of unknown monitors.
    ///
    /// Slots another caller is holding are kept. Returns the number of
    /// entries removed.
    pub fn retain_active<F>(&self, now: DateTime<Utc>, cooldown_of: F) -> usize
    where
        F: Fn(&str) -> Option<Duration>,
    {
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|(monitor_id, _), slot| {
            // Handles are only cloned under the map lock, so an extra count
            // means a decision is in flight.
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let Some(cooldown) = cooldown_of(monitor_id) else {
                return false;
            };
            (*slot.lock()).is_some_and(|state| !state.is_expired(cooldown, now))
        });
        before - slots.len()
    }

    /// Number of keys with a recorded alert.
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .values()
            .filter(|slot| slot.lock().is_some())
            .count()
    }

    /// Returns true if nothing is cooling down.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies every cooldown out for persistence, sorted by key.
    pub fn snapshot(&self) -> Vec<CooldownEntry> {
        let mut entries: Vec<CooldownEntry> = self
            .slots
            .read()
            .iter()
            .filter_map(|((monitor_id, key), slot)| {
                let state = (*slot.lock())?;
                Some(CooldownEntry {
                    monitor_id: monitor_id.clone(),
                    key: key.clone(),
                    state,
                })
            })
            .collect();
        entries.sort_by(|a, b| (&a.monitor_id, &a.key).cmp(&(&b.monitor_id, &b.key)));
        entries
    }

    /// Replaces all cooldowns with `entries`.
    pub fn restore(&self, entries: Vec<CooldownEntry>) {
        let restored = entries
            .into_iter()
            .map(|entry| {
                let slot = Arc::new(Mutex::new(Some(entry.state)));
                ((entry.monitor_id, entry.key), slot)
            })
            .collect();
        *self.slots.write() = restored;
    }
}

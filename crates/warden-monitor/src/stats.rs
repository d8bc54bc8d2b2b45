//! Daemon statistics.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::monitor::Evaluation;

/// Per-monitor counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStats {
    /// Cycles that completed.
    pub checks_ok: u64,
    /// Cycles that failed (source error, timeout, panic).
    pub checks_failed: u64,
    /// Failures since the last success.
    pub consecutive_failures: u64,
    /// Candidate events evaluated.
    pub events_seen: u64,
    /// Alerts emitted.
    pub alerts_sent: u64,
    /// Crossings held back by cooldown.
    pub alerts_suppressed: u64,
    /// Most recent failure message.
    pub last_error: Option<String>,
    /// When the monitor last ran.
    pub last_run: Option<DateTime<Utc>>,
}

impl MonitorStats {
    pub(crate) fn record_success(&mut self, evaluation: &Evaluation, at: DateTime<Utc>) {
        self.checks_ok += 1;
        self.consecutive_failures = 0;
        self.events_seen += evaluation.events as u64;
        self.alerts_sent += evaluation.alerts.len() as u64;
        self.alerts_suppressed += evaluation.suppressed as u64;
        self.last_run = Some(at);
    }

    pub(crate) fn record_failure(&mut self, error: String, at: DateTime<Utc>) {
        self.checks_failed += 1;
        self.consecutive_failures += 1;
        self.last_error = Some(error);
        self.last_run = Some(at);
    }
}

/// Snapshot of daemon activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStats {
    /// Completed cycles.
    pub cycles_run: u64,
    /// Alerts emitted across all monitors.
    pub alerts_sent: u64,
    /// Crossings held back by cooldown.
    pub alerts_suppressed: u64,
    /// Alerts that failed on at least one channel.
    pub alerts_failed_delivery: u64,
    /// Successful state snapshots.
    pub persists_ok: u64,
    /// Failed state snapshots.
    pub persists_failed: u64,
    /// When the daemon was created.
    pub uptime_start: DateTime<Utc>,
    /// End of the most recent cycle.
    pub last_cycle_at: Option<DateTime<Utc>>,
    /// Most recent successful snapshot.
    pub last_persist_at: Option<DateTime<Utc>>,
    /// Counters per monitor id.
    pub monitors: BTreeMap<String, MonitorStats>,
}

impl DaemonStats {
    /// Creates zeroed stats starting at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            cycles_run: 0,
            alerts_sent: 0,
            alerts_suppressed: 0,
            alerts_failed_delivery: 0,
            persists_ok: 0,
            persists_failed: 0,
            uptime_start: now,
            last_cycle_at: None,
            last_persist_at: None,
            monitors: BTreeMap::new(),
        }
    }

    /// Counters for one monitor.
    #[must_use]
    pub fn monitor(&self, id: &str) -> Option<&MonitorStats> {
        self.monitors.get(id)
    }

    pub(crate) fn monitor_mut(&mut self, id: &str) -> &mut MonitorStats {
        self.monitors.entry(id.to_string()).or_default()
    }

    /// Time since the daemon was created.
    #[must_use]
    pub fn uptime(&self, now: DateTime<Utc>) -> TimeDelta {
        now.signed_duration_since(self.uptime_start)
    }
}

//! Sliding-window event counting per tracked key.
//!
//! Every `(monitor_id, key)` pair owns a sorted queue of event timestamps.
//! Entries that fall out of the window are pruned lazily whenever the key is
//! read or written, so counts never include expired events.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default cap on timestamps kept per key.
pub const DEFAULT_MAX_EVENTS_PER_KEY: usize = 10_000;

/// Identity of a tracked series: `(monitor_id, key)`.
pub type TrackKey = (String, String);

type Timeline = Arc<Mutex<VecDeque<DateTime<Utc>>>>;

/// Converts a std duration into a chrono delta, saturating on overflow.
pub(crate) fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Returns `now - window`, clamped to the earliest representable instant.
pub(crate) fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(to_delta(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Persisted form of one tracked series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowEntry {
    /// Owning monitor.
    pub monitor_id: String,
    /// Tracked key.
    pub key: String,
    /// Event timestamps, oldest first.
    pub timestamps: Vec<DateTime<Utc>>,
}

/// Counts events per `(monitor_id, key)` inside a sliding time window.
///
/// The outer map lock is held only long enough to find or create a key's
/// timeline; the timeline itself has its own mutex, so work on different
/// keys never serializes.
#[derive(Debug)]
pub struct EventTracker {
    timelines: RwLock<HashMap<TrackKey, Timeline>>,
    max_events_per_key: usize,
}

impl Default for EventTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl EventTracker {
    /// Creates an empty tracker with the default per-key cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_events_per_key(DEFAULT_MAX_EVENTS_PER_KEY)
    }

    /// Creates an empty tracker keeping at most `max` timestamps per key.
    #[must_use]
    pub fn with_max_events_per_key(max: usize) -> Self {
        Self {
            timelines: RwLock::new(HashMap::new()),
            max_events_per_key: max.max(1),
        }
    }

    fn timeline(&self, monitor_id: &str, key: &str) -> Timeline {
        let track_key = (monitor_id.to_string(), key.to_string());
        if let Some(timeline) = self.timelines.read().get(&track_key) {
            return Arc::clone(timeline);
        }
        Arc::clone(self.timelines.write().entry(track_key).or_default())
    }

    fn existing(&self, monitor_id: &str, key: &str) -> Option<Timeline> {
        self.timelines
            .read()
            .get(&(monitor_id.to_string(), key.to_string()))
            .map(Arc::clone)
    }

    /// Records one event at `timestamp`, keeping the timeline sorted.
    pub fn record(&self, monitor_id: &str, key: &str, timestamp: DateTime<Utc>) {
        let timeline = self.timeline(monitor_id, key);
        let mut events = timeline.lock();

        if events.back().is_none_or(|last| *last <= timestamp) {
            events.push_back(timestamp);
        } else {
            let pos = events.partition_point(|t| *t <= timestamp);
            events.insert(pos, timestamp);
        }

        while events.len() > self.max_events_per_key {
            events.pop_front();
        }
    }

    /// Records one event and returns the count in `[now - window, now]`.
    pub fn record_and_count(
        &self,
        monitor_id: &str,
        key: &str,
        timestamp: DateTime<Utc>,
        window: Duration,
        now: DateTime<Utc>,
    ) -> usize {
        self.record(monitor_id, key, timestamp);
        self.count_in_window_at(monitor_id, key, window, now)
    }

    /// Counts events in the window ending now.
    pub fn count_in_window(&self, monitor_id: &str, key: &str, window: Duration) -> usize {
        self.count_in_window_at(monitor_id, key, window, Utc::now())
    }

    /// Counts events with timestamps in `[now - window, now]`.
    ///
    /// Entries older than `now - window` are removed as a side effect.
    pub fn count_in_window_at(
        &self,
        monitor_id: &str,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> usize {
        let Some(timeline) = self.existing(monitor_id, key) else {
            return 0;
        };
        let cutoff = window_start(now, window);
        let mut events = timeline.lock();

        while events.front().is_some_and(|t| *t < cutoff) {
            events.pop_front();
        }
        events.partition_point(|t| *t <= now)
    }

    /// Returns the timestamp of the newest event for a key.
    pub fn latest(&self, monitor_id: &str, key: &str) -> Option<DateTime<Utc>> {
        self.existing(monitor_id, key)
            .and_then(|timeline| timeline.lock().back().copied())
    }

    /// Prunes every key against its monitor's window and drops keys left
    /// empty. Keys whose monitor is unknown to `window_of` are dropped.
    ///
    /// Returns the number of keys removed.
    pub fn retain_active<F>(&self, now: DateTime<Utc>, window_of: F) -> usize
    where
        F: Fn(&str) -> Option<Duration>,
    {
        let mut timelines = self.timelines.write();
        let before = timelines.len();

        timelines.retain(|(monitor_id, _), timeline| {
            let Some(window) = window_of(monitor_id) else {
                return false;
            };
            let cutoff = window_start(now, window);
            let mut events = timeline.lock();
            while events.front().is_some_and(|t| *t < cutoff) {
                events.pop_front();
            }
            !events.is_empty()
        });

        let removed = before - timelines.len();
        if removed > 0 {
            debug!(removed, remaining = timelines.len(), "pruned idle tracker keys");
        }
        removed
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.timelines.read().len()
    }

    /// Returns true if no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.timelines.read().is_empty()
    }

    /// Copies every timeline out for persistence, sorted by key.
    pub fn snapshot(&self) -> Vec<WindowEntry> {
        let mut entries: Vec<WindowEntry> = self
            .timelines
            .read()
            .iter()
            .map(|((monitor_id, key), timeline)| WindowEntry {
                monitor_id: monitor_id.clone(),
                key: key.clone(),
                timestamps: timeline.lock().iter().copied().collect(),
            })
            .filter(|entry| !entry.timestamps.is_empty())
            .collect();
        entries.sort_by(|a, b| (&a.monitor_id, &a.key).cmp(&(&b.monitor_id, &b.key)));
        entries
    }

    /// Replaces all timelines with `entries`.
    pub fn restore(&self, entries: Vec<WindowEntry>) {
        let mut restored = HashMap::with_capacity(entries.len());
        for entry in entries {
            let mut timestamps = entry.timestamps;
            timestamps.sort_unstable();
            let skip = timestamps.len().saturating_sub(self.max_events_per_key);
            let events: VecDeque<_> = timestamps.into_iter().skip(skip).collect();
            restored.insert((entry.monitor_id, entry.key), Arc::new(Mutex::new(events)));
        }
        *self.timelines.write() = restored;
    }
}

//! Durable engine state.
//!
//! Window timelines, cooldowns and file source read positions are written as
//! one versioned JSON snapshot
//! through [`JsonStore`]. A missing snapshot is a cold start; an unreadable
//! one is moved aside as `<name>.json.corrupt` and also treated as a cold
//! start, so a bad file never keeps the daemon from running.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use warden_persist::JsonStore;

use crate::cooldown::{CooldownEntry, CooldownManager};
use crate::source::SourceCursor;
use crate::tracker::{EventTracker, WindowEntry};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

const SNAPSHOT_NAME: &str = "engine-state";

/// Everything the engine needs to resume after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Format version.
    pub version: u32,
    /// When the snapshot was taken.
    pub saved_at: DateTime<Utc>,
    /// Window timelines.
    #[serde(default)]
    pub windows: Vec<WindowEntry>,
    /// Active cooldowns.
    #[serde(default)]
    pub cooldowns: Vec<CooldownEntry>,
    /// Source read positions.
    #[serde(default)]
    pub cursors: Vec<CursorEntry>,
}

/// Saved read position of one monitor's source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorEntry {
    /// Monitor owning the source.
    pub monitor_id: String,
    /// Where its source stopped reading.
    #[serde(flatten)]
    pub cursor: SourceCursor,
}

impl EngineSnapshot {
    /// Captures the current tracker and cooldown state.
    #[must_use]
    pub fn capture(tracker: &EventTracker, cooldowns: &CooldownManager, now: DateTime<Utc>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: now,
            windows: tracker.snapshot(),
            cooldowns: cooldowns.snapshot(),
            cursors: Vec::new(),
        }
    }

    /// Attaches source read positions.
    #[must_use]
    pub fn with_cursors(mut self, mut cursors: Vec<CursorEntry>) -> Self {
        cursors.sort_by(|a, b| a.monitor_id.cmp(&b.monitor_id));
        self.cursors = cursors;
        self
    }

    /// Loads windows and cooldowns into the engine and hands back the
    /// source cursors for the caller to resume.
    pub fn apply(self, tracker: &EventTracker, cooldowns: &CooldownManager) -> Vec<CursorEntry> {
        info!(
            saved_at = %self.saved_at,
            windows = self.windows.len(),
            cooldowns = self.cooldowns.len(),
            cursors = self.cursors.len(),
            "restored engine state"
        );
        tracker.restore(self.windows);
        cooldowns.restore(self.cooldowns);
        self.cursors
    }
}

/// How the last load went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A snapshot was found and applied.
    Restored {
        /// Number of restored timelines.
        windows: usize,
        /// Number of restored cooldowns.
        cooldowns: usize,
        /// Number of saved source positions.
        cursors: usize,
    },
    /// No snapshot existed.
    ColdStart,
    /// The snapshot was unusable and was set aside.
    Recovered {
        /// Where the bad file was moved, if the move worked.
        quarantined: Option<PathBuf>,
        /// Why it was rejected.
        reason: String,
    },
}

impl LoadOutcome {
    /// Returns true if previous state was applied.
    #[must_use]
    pub const fn is_restored(&self) -> bool {
        matches!(self, Self::Restored { .. })
    }
}

/// Loads and saves [`EngineSnapshot`]s in a state directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    store: JsonStore,
}

impl StateStore {
    /// Creates a store for `<state_dir>/engine-state.json`.
    #[must_use]
    pub fn new(state_dir: &Path) -> Self {
        Self {
            store: JsonStore::new(state_dir, SNAPSHOT_NAME),
        }
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.store.path()
    }

    /// Reads the snapshot, if a usable one exists.
    pub fn load(&self) -> (Option<EngineSnapshot>, LoadOutcome) {
        let reason = match self.store.try_load::<EngineSnapshot>() {
            Ok(None) => {
                info!(path = %self.path().display(), "no state snapshot, cold start");
                return (None, LoadOutcome::ColdStart);
            }
            Ok(Some(snapshot)) if snapshot.version == SNAPSHOT_VERSION => {
                let outcome = LoadOutcome::Restored {
                    windows: snapshot.windows.len(),
                    cooldowns: snapshot.cooldowns.len(),
                    cursors: snapshot.cursors.len(),
                };
                return (Some(snapshot), outcome);
            }
            Ok(Some(snapshot)) => format!("unsupported snapshot version {}", snapshot.version),
            Err(e) => e.to_string(),
        };

        warn!(path = %self.path().display(), reason = %reason, "state snapshot unusable, cold start");
        let quarantined = match self.store.quarantine() {
            Ok(moved) => moved,
            Err(e) => {
                warn!(error = %e, "failed to quarantine state snapshot");
                None
            }
        };
        (None, LoadOutcome::Recovered { quarantined, reason })
    }

    /// Loads the snapshot into `tracker` and `cooldowns`, returning the
    /// saved source cursors alongside the outcome.
    pub fn restore_into(
        &self,
        tracker: &EventTracker,
        cooldowns: &CooldownManager,
    ) -> (LoadOutcome, Vec<CursorEntry>) {
        let (snapshot, outcome) = self.load();
        let cursors = snapshot
            .map(|snapshot| snapshot.apply(tracker, cooldowns))
            .unwrap_or_default();
        (outcome, cursors)
    }

    /// Writes `snapshot` atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written; the previous
    /// snapshot is left untouched.
    pub fn save(&self, snapshot: &EngineSnapshot) -> warden_persist::Result<()> {
        self.store.save(snapshot)
    }

    /// Captures and writes the current state.
    ///
    /// # Errors
    ///
    /// See [`StateStore::save`].
    pub fn persist(
        &self,
        tracker: &EventTracker,
        cooldowns: &CooldownManager,
        cursors: Vec<CursorEntry>,
        now: DateTime<Utc>,
    ) -> warden_persist::Result<()> {
        self.save(&EngineSnapshot::capture(tracker, cooldowns, now).with_cursors(cursors))
    }
}

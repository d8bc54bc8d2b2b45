//! Monitoring engine for warden.
//!
//! `warden-monitor` turns raw occurrences into tiered, deduplicated alerts:
//!
//! - [`EventTracker`] counts events per `(monitor, key)` in a sliding window
//! - [`CooldownManager`] suppresses repeats and lets escalations through
//! - [`Monitor`] pulls a [`DataSource`] under a timeout and evaluates tiers
//! - [`StateStore`] persists windows and cooldowns across restarts
//! - [`Daemon`] schedules monitors and isolates their failures
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use warden_alerts::{AlertDispatcher, AlertSeverity, DispatcherConfig, Tier, TierSet};
//! use warden_monitor::{
//!     Daemon, Monitor, MonitorDefinition, MonitorKind, MonitorRegistry, RawRecord, StaticSource,
//! };
//!
//! let tiers = TierSet::new(vec![Tier::new(5.0, AlertSeverity::Critical)]).unwrap();
//! let source = Arc::new(StaticSource::new("ssh"));
//! source.push((0..5).map(|_| RawRecord::new("203.0.113.42")).collect());
//!
//! let mut registry = MonitorRegistry::new();
//! registry
//!     .register(Monitor::new(
//!         MonitorDefinition::new("ssh_failures", MonitorKind::SshFailures, tiers),
//!         source,
//!     ))
//!     .unwrap();
//!
//! let dispatcher = AlertDispatcher::new(DispatcherConfig::default()).dry_run(true);
//! let daemon = Daemon::new(registry, dispatcher, None);
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let report = runtime.block_on(daemon.run_once());
//! assert_eq!(report.alerts.len(), 1);
//! assert_eq!(report.alerts[0].severity, AlertSeverity::Critical);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod cooldown;
pub mod daemon;
pub mod error;
pub mod monitor;
pub mod registry;
pub mod source;
pub mod state;
pub mod stats;
pub mod tracker;

pub use config::{MonitorConfig, SAMPLE_CONFIG, WardenConfig};
pub use cooldown::{CooldownEntry, CooldownManager, CooldownState};
pub use daemon::{CycleReport, Daemon};
pub use error::{ConfigError, MonitorError, Result, SourceError};
pub use monitor::{
    CandidateEvent, Evaluation, EvaluationMode, MAX_DURATION, Monitor, MonitorContext,
    MonitorDefinition, MonitorKind,
};
pub use registry::MonitorRegistry;
pub use source::{
    CommandSource, DataSource, HttpSource, JsonLinesSource, RawRecord, SourceConfig, SourceCursor,
    StaticSource,
};
pub use state::{CursorEntry, EngineSnapshot, LoadOutcome, StateStore};
pub use stats::{DaemonStats, MonitorStats};
pub use tracker::{EventTracker, WindowEntry};

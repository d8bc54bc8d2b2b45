//! The daemon loop.
//!
//! The [`Daemon`] owns the registry, the shared tracker/cooldown/dispatcher
//! context and the state store. Each monitor is scheduled by its own
//! interval; a cycle runs every monitor that is due, one after another, each
//! inside its own task so that an error or panic only fails that monitor.
//!
//! State is persisted after cycles that emitted alerts, at least every
//! `persist_interval`, and once more on shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_alerts::{Alert, AlertDispatcher};

use crate::config::WardenConfig;
use crate::cooldown::CooldownManager;
use crate::error::{ConfigError, MonitorError, Result};
use crate::monitor::{Monitor, MonitorContext};
use crate::registry::MonitorRegistry;
use crate::state::{CursorEntry, LoadOutcome, StateStore};
use crate::stats::DaemonStats;
use crate::tracker::EventTracker;

/// Default maximum time between snapshots.
pub const DEFAULT_PERSIST_INTERVAL: Duration = Duration::from_secs(300);

// Stand-in deadline when `from + after` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline(from: Instant, after: Duration) -> Instant {
    from.checked_add(after)
        .or_else(|| from.checked_add(FAR_FUTURE))
        .unwrap_or(from)
}

/// Summary of one cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Monitors that ran.
    pub monitors_run: usize,
    /// Monitors whose cycle failed.
    pub monitors_failed: usize,
    /// Candidate events evaluated.
    pub events: usize,
    /// Alerts emitted.
    pub alerts: Vec<Alert>,
    /// Crossings held back by cooldown.
    pub suppressed: usize,
    /// Alerts that failed on at least one channel.
    pub failed_delivery: usize,
}

/// Runs monitors on their schedules until cancelled.
#[derive(Debug)]
pub struct Daemon {
    registry: Arc<MonitorRegistry>,
    ctx: MonitorContext,
    state: Option<StateStore>,
    persist_interval: Duration,
    stats: Arc<RwLock<DaemonStats>>,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
}

impl Daemon {
    /// Creates a daemon. Without a state store nothing is persisted.
    #[must_use]
    pub fn new(
        registry: MonitorRegistry,
        dispatcher: AlertDispatcher,
        state: Option<StateStore>,
    ) -> Self {
        let ctx = MonitorContext::new(
            Arc::new(EventTracker::new()),
            Arc::new(CooldownManager::new()),
            Arc::new(dispatcher),
        );
        Self {
            registry: Arc::new(registry),
            ctx,
            state,
            persist_interval: DEFAULT_PERSIST_INTERVAL,
            stats: Arc::new(RwLock::new(DaemonStats::new(Utc::now()))),
            cancel: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Builds a daemon from configuration.
    ///
    /// A dry-run daemon never touches the state directory and never contacts
    /// a channel.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a monitor, channel or route is invalid.
    pub fn from_config(config: &WardenConfig, dry_run: bool) -> std::result::Result<Self, ConfigError> {
        let registry = config.build_registry_with(dry_run)?;
        let dispatcher = config.build_dispatcher(dry_run)?;
        let state = (!dry_run).then(|| StateStore::new(&config.state_dir));
        Ok(Self::new(registry, dispatcher, state).with_persist_interval(config.persist_interval()))
    }

    /// Sets the maximum time between snapshots.
    #[must_use]
    pub const fn with_persist_interval(mut self, interval: Duration) -> Self {
        self.persist_interval = interval;
        self
    }

    /// The monitor registry.
    #[must_use]
    pub fn registry(&self) -> &MonitorRegistry {
        &self.registry
    }

    /// The event tracker.
    #[must_use]
    pub fn tracker(&self) -> &EventTracker {
        &self.ctx.tracker
    }

    /// The cooldown manager.
    #[must_use]
    pub fn cooldowns(&self) -> &CooldownManager {
        &self.ctx.cooldowns
    }

    /// A token that stops the daemon when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns true while [`Daemon::run`] is executing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Asks the loop to stop. The current cycle finishes, state is
    /// persisted, then `run` returns.
    pub fn stop(&self) {
        info!("daemon stop requested");
        self.cancel.cancel();
    }

    /// A copy of the current statistics.
    #[must_use]
    pub fn stats(&self) -> DaemonStats {
        self.stats.read().clone()
    }

    /// Loads persisted windows and cooldowns, and moves each source back
    /// to where it stopped reading.
    ///
    /// Returns `None` when the daemon has no state store.
    pub fn restore_state(&self) -> Option<LoadOutcome> {
        let state = self.state.as_ref()?;
        let (outcome, cursors) = state.restore_into(&self.ctx.tracker, &self.ctx.cooldowns);
        if let LoadOutcome::Recovered { reason, .. } = &outcome {
            warn!(reason = %reason, "starting without previous state");
        }
        for entry in cursors {
            match self.registry.get(&entry.monitor_id) {
                Some(monitor) => {
                    debug!(monitor = %entry.monitor_id, offset = entry.cursor.offset, "resuming source");
                    monitor.source().resume(entry.cursor);
                }
                None => debug!(monitor = %entry.monitor_id, "dropping cursor of unknown monitor"),
            }
        }
        Some(outcome)
    }

    fn source_cursors(&self) -> Vec<CursorEntry> {
        self.registry
            .iter()
            .filter_map(|monitor| {
                monitor.source().checkpoint().map(|cursor| CursorEntry {
                    monitor_id: monitor.id().to_string(),
                    cursor,
                })
            })
            .collect()
    }

    /// Writes a snapshot now, after dropping expired entries.
    ///
    /// Returns true if a snapshot was written. Failures are logged and
    /// counted; the next persist point retries.
    pub fn persist_now(&self) -> bool {
        let Some(state) = &self.state else {
            return false;
        };
        let now = Utc::now();
        let registry = &self.registry;
        self.ctx
            .tracker
            .retain_active(now, |id| registry.window_of(id));
        self.ctx
            .cooldowns
            .retain_active(now, |id| registry.cooldown_of(id));

        match state.persist(&self.ctx.tracker, &self.ctx.cooldowns, self.source_cursors(), now) {
            Ok(()) => {
                let mut stats = self.stats.write();
                stats.persists_ok += 1;
                stats.last_persist_at = Some(now);
                debug!(path = %state.path().display(), "persisted engine state");
                true
            }
            Err(e) => {
                self.stats.write().persists_failed += 1;
                warn!(error = %e, "failed to persist engine state");
                false
            }
        }
    }

    /// Runs one cycle over every enabled monitor, ignoring schedules and
    /// without persisting.
    pub async fn run_once(&self) -> CycleReport {
        let due: Vec<Monitor> = self.registry.enabled().cloned().collect();
        self.run_cycle(&due).await
    }

    /// Spawns [`Daemon::run`] on the runtime.
    pub fn start(self: &Arc<Self>) -> JoinHandle<Result<()>> {
        let daemon = Arc::clone(self);
        tokio::spawn(async move { daemon.run().await })
    }

    /// Runs until the cancellation token fires.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::AlreadyRunning` if another `run` is active.
    /// Monitor and channel failures never end the loop.
    pub async fn run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(MonitorError::AlreadyRunning);
        }

        self.restore_state();
        let started = Instant::now();
        let mut next_due: HashMap<String, Instant> = self
            .registry
            .enabled()
            .map(|m| (m.id().to_string(), started))
            .collect();
        let mut last_persist = started;

        info!(
            monitors = next_due.len(),
            persist_interval_secs = self.persist_interval.as_secs(),
            "daemon started"
        );

        while !self.cancel.is_cancelled() {
            let now = Instant::now();
            let due: Vec<Monitor> = self
                .registry
                .enabled()
                .filter(|m| next_due.get(m.id()).is_some_and(|at| *at <= now))
                .cloned()
                .collect();

            if !due.is_empty() {
                let report = self.run_cycle(&due).await;
                let finished = Instant::now();
                for monitor in &due {
                    let at = deadline(finished, monitor.definition().interval);
                    next_due.insert(monitor.id().to_string(), at);
                }
                if !report.alerts.is_empty() && self.persist_now() {
                    last_persist = finished;
                }
            }

            if last_persist.elapsed() >= self.persist_interval {
                self.persist_now();
                last_persist = Instant::now();
            }

            let wake = next_due
                .values()
                .copied()
                .chain(std::iter::once(deadline(last_persist, self.persist_interval)))
                .min()
                .unwrap_or_else(|| deadline(Instant::now(), self.persist_interval));

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep_until(wake) => {}
            }
        }

        self.persist_now();
        self.running.store(false, Ordering::SeqCst);
        info!(cycles = self.stats.read().cycles_run, "daemon stopped");
        Ok(())
    }

    async fn run_cycle(&self, due: &[Monitor]) -> CycleReport {
        let mut report = CycleReport::default();

        for monitor in due {
            let id = monitor.id().to_string();
            let task_monitor = monitor.clone();
            let ctx = self.ctx.clone();
            let now = Utc::now();
            let outcome = tokio::spawn(async move { task_monitor.run_cycle(&ctx, now).await }).await;
            report.monitors_run += 1;

            let mut stats = self.stats.write();
            match outcome {
                Ok(Ok(evaluation)) => {
                    stats.monitor_mut(&id).record_success(&evaluation, now);
                    stats.alerts_sent += evaluation.alerts.len() as u64;
                    stats.alerts_suppressed += evaluation.suppressed as u64;
                    stats.alerts_failed_delivery += evaluation.failed_delivery as u64;

                    report.events += evaluation.events;
                    report.suppressed += evaluation.suppressed;
                    report.failed_delivery += evaluation.failed_delivery;
                    report.alerts.extend(evaluation.alerts);
                }
                Ok(Err(e)) => {
                    report.monitors_failed += 1;
                    let entry = stats.monitor_mut(&id);
                    entry.record_failure(e.to_string(), now);
                    warn!(
                        monitor = %id,
                        consecutive_failures = entry.consecutive_failures,
                        error = %e,
                        "monitor check failed"
                    );
                }
                Err(join_error) => {
                    report.monitors_failed += 1;
                    stats
                        .monitor_mut(&id)
                        .record_failure(format!("monitor task failed: {join_error}"), now);
                    error!(monitor = %id, error = %join_error, "monitor task panicked");
                }
            }
        }

        let mut stats = self.stats.write();
        stats.cycles_run += 1;
        stats.last_cycle_at = Some(Utc::now());
        debug!(
            cycle = stats.cycles_run,
            monitors = report.monitors_run,
            failed = report.monitors_failed,
            alerts = report.alerts.len(),
            "cycle complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{MonitorDefinition, MonitorKind};
    use crate::source::{DataSource, RawRecord, StaticSource};
    use warden_alerts::{AlertSeverity, DispatcherConfig, LogChannel, Tier, TierSet};

    fn dispatcher() -> AlertDispatcher {
        let mut dispatcher = AlertDispatcher::new(DispatcherConfig {
            default_channels: vec!["log".to_string()],
            ..DispatcherConfig::default()
        });
        dispatcher.add_channel(Box::new(LogChannel::default())).unwrap();
        dispatcher
    }

    fn monitor(id: &str, source: Arc<StaticSource>, interval: Duration) -> Monitor {
        let tiers = TierSet::new(vec![Tier::new(2.0, AlertSeverity::Warning)]).unwrap();
        let def = MonitorDefinition::new(id, MonitorKind::FirewallBlocks, tiers)
            .with_interval(interval)
            .with_source_timeout(Duration::from_secs(1));
        Monitor::new(def, source)
    }

    #[tokio::test]
    async fn run_once_counts_cycle_and_alerts() {
        let source = Arc::new(StaticSource::new("fw"));
        source.push(vec![RawRecord::new("198.51.100.7"), RawRecord::new("198.51.100.7")]);

        let mut registry = MonitorRegistry::new();
        registry.register(monitor("fw", source, Duration::from_secs(60))).unwrap();
        let daemon = Daemon::new(registry, dispatcher(), None);

        let report = daemon.run_once().await;
        assert_eq!(report.alerts.len(), 1);

        let stats = daemon.stats();
        assert_eq!(stats.cycles_run, 1);
        assert_eq!(stats.alerts_sent, 1);
        assert_eq!(stats.monitor("fw").unwrap().events_seen, 2);
    }

    #[test]
    fn deadline_saturates_instead_of_overflowing() {
        let now = Instant::now();
        assert_eq!(deadline(now, Duration::from_secs(5)), now + Duration::from_secs(5));
        assert!(deadline(now, Duration::MAX) > now);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_intervals_do_not_stop_the_loop() {
        let source = Arc::new(StaticSource::new("rare"));
        let mut registry = MonitorRegistry::new();
        registry.register(monitor("rare", source, Duration::MAX)).unwrap();
        let daemon = Arc::new(Daemon::new(registry, dispatcher(), None).with_persist_interval(Duration::MAX));

        let handle = daemon.start();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(daemon.is_running());
        daemon.stop();
        handle.await.unwrap().unwrap();

        assert_eq!(daemon.stats().cycles_run, 1);
    }

    #[tokio::test]
    async fn disabled_monitor_never_runs() {
        let tiers = TierSet::new(vec![Tier::new(1.0, AlertSeverity::Warning)]).unwrap();
        let source = Arc::new(StaticSource::new("off"));
        source.push(vec![RawRecord::new("k")]);
        let def = MonitorDefinition::new("off", MonitorKind::FileIntegrity, tiers).enabled(false);

        let mut registry = MonitorRegistry::new();
        registry.register(Monitor::new(def, Arc::clone(&source) as Arc<dyn DataSource>)).unwrap();
        let daemon = Daemon::new(registry, dispatcher(), None);

        let report = daemon.run_once().await;
        assert_eq!(report.monitors_run, 0);
        assert_eq!(source.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_schedules_by_interval_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let fast = Arc::new(StaticSource::new("fast"));
        let slow = Arc::new(StaticSource::new("slow"));

        let mut registry = MonitorRegistry::new();
        registry.register(monitor("fast", fast, Duration::from_secs(10))).unwrap();
        registry.register(monitor("slow", slow, Duration::from_secs(60))).unwrap();
        let daemon = Arc::new(Daemon::new(registry, dispatcher(), Some(StateStore::new(dir.path()))));

        let handle = daemon.start();
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert!(daemon.is_running());
        daemon.stop();
        handle.await.unwrap().unwrap();

        let stats = daemon.stats();
        let fast_runs = stats.monitor("fast").unwrap().checks_ok;
        let slow_runs = stats.monitor("slow").unwrap().checks_ok;
        assert!(fast_runs >= 6, "fast ran {fast_runs} times");
        assert_eq!(slow_runs, 2);
        assert!(!daemon.is_running());
        assert!(StateStore::new(dir.path()).path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_is_rejected() {
        let daemon = Arc::new(Daemon::new(MonitorRegistry::new(), dispatcher(), None));
        let handle = daemon.start();
        while !daemon.is_running() {
            tokio::task::yield_now().await;
        }

        assert!(matches!(daemon.run().await, Err(MonitorError::AlreadyRunning)));
        daemon.stop();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn persist_without_store_is_noop() {
        let daemon = Daemon::new(MonitorRegistry::new(), dispatcher(), None);
        assert!(!daemon.persist_now());
        assert!(daemon.restore_state().is_none());
    }
}

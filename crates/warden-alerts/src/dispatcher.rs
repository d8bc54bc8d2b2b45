//! Alert dispatcher for routing alerts to notification channels.
//!
//! This module provides the [`AlertDispatcher`], which records every alert
//! locally and then delivers it to the channels selected by a static route
//! table. Each channel send is bounded by a timeout and runs concurrently
//! with the others, so one slow destination costs at most its own timeout.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::channels::{ChannelConfig, NotificationChannel};
use crate::error::{AlertError, Result};
use crate::journal::AlertJournal;
use crate::types::{Alert, AlertCategory, AlertSeverity, DeliveryStatus};

const fn default_channel_timeout() -> u64 {
    10
}

const fn default_dedup_capacity() -> usize {
    4096
}

const fn default_min_severity() -> AlertSeverity {
    AlertSeverity::Info
}

/// One entry of the static routing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Category to match; `None` matches every category.
    #[serde(default)]
    pub category: Option<AlertCategory>,
    /// Lowest severity this route accepts.
    #[serde(default = "default_min_severity")]
    pub min_severity: AlertSeverity,
    /// Channel names to deliver to.
    pub channels: Vec<String>,
}

impl RouteConfig {
    /// Returns true if this route applies to `alert`.
    #[must_use]
    pub fn matches(&self, alert: &Alert) -> bool {
        self.category.is_none_or(|c| c == alert.category) && alert.severity >= self.min_severity
    }
}

/// Configuration for the alert dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Per-channel send timeout (in seconds).
    #[serde(default = "default_channel_timeout")]
    pub channel_timeout_secs: u64,
    /// How many `(alert, channel)` deliveries to remember for deduplication.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    /// Channels to build at startup.
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    /// Routing table; every matching route contributes its channels.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    /// Channels used when no route matches.
    #[serde(default)]
    pub default_channels: Vec<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            channel_timeout_secs: default_channel_timeout(),
            dedup_capacity: default_dedup_capacity(),
            channels: Vec::new(),
            routes: Vec::new(),
            default_channels: Vec::new(),
        }
    }
}

impl DispatcherConfig {
    /// Returns the per-channel timeout.
    #[must_use]
    pub const fn channel_timeout(&self) -> Duration {
        Duration::from_secs(self.channel_timeout_secs)
    }
}

/// Outcome of dispatching one alert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// The dispatched alert.
    pub alert_id: String,
    /// Channels selected by routing.
    pub routed: Vec<String>,
    /// Channels that accepted the alert.
    pub delivered: usize,
    /// Channels that failed or timed out.
    pub failed: usize,
    /// Channels skipped (dry run or disabled).
    pub skipped: usize,
    /// Channels that had already received this alert.
    pub duplicates: usize,
}

impl DispatchReport {
    /// Returns true if any routed channel failed.
    #[must_use]
    pub const fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Cumulative dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Alerts handed to the dispatcher.
    pub alerts_dispatched: u64,
    /// Successful channel deliveries.
    pub deliveries_ok: u64,
    /// Failed channel deliveries (errors and rejections).
    pub deliveries_failed: u64,
    /// Channel deliveries that hit the timeout.
    pub deliveries_timed_out: u64,
}

#[derive(Debug, Default)]
struct Counters {
    alerts_dispatched: AtomicU64,
    deliveries_ok: AtomicU64,
    deliveries_failed: AtomicU64,
    deliveries_timed_out: AtomicU64,
}

/// Bounded memory of `(alert_id, channel)` pairs already delivered.
#[derive(Debug)]
struct DeliveryLedger {
    seen: HashSet<(String, String)>,
    order: VecDeque<(String, String)>,
    capacity: usize,
}

impl DeliveryLedger {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, alert_id: &str, channel: &str) -> bool {
        self.seen
            .contains(&(alert_id.to_string(), channel.to_string()))
    }

    fn insert(&mut self, alert_id: &str, channel: &str) {
        let entry = (alert_id.to_string(), channel.to_string());
        if self.seen.insert(entry.clone()) {
            self.order.push_back(entry);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }
}

/// Routes alerts to notification channels.
///
/// The channel set and routing table are fixed at construction; the
/// dispatcher is then shared read-only (`Arc<AlertDispatcher>`).
#[derive(Debug)]
pub struct AlertDispatcher {
    config: DispatcherConfig,
    channels: HashMap<String, Box<dyn NotificationChannel>>,
    ledger: Mutex<DeliveryLedger>,
    journal: Option<AlertJournal>,
    dry_run: bool,
    counters: Counters,
}

impl AlertDispatcher {
    /// Creates a dispatcher with no channels.
    #[must_use]
    pub fn new(config: DispatcherConfig) -> Self {
        let ledger = DeliveryLedger::new(config.dedup_capacity);
        Self {
            config,
            channels: HashMap::new(),
            ledger: Mutex::new(ledger),
            journal: None,
            dry_run: false,
            counters: Counters::default(),
        }
    }

    /// Creates a dispatcher, builds its configured channels and validates
    /// the routing table.
    ///
    /// # Errors
    ///
    /// Returns an error if a channel cannot be built, two channels share a
    /// name, or a route references an unknown channel.
    pub fn from_config(config: DispatcherConfig) -> Result<Self> {
        let channel_configs = config.channels.clone();
        let mut dispatcher = Self::new(config);
        for channel_config in &channel_configs {
            dispatcher.add_channel(channel_config.build()?)?;
        }
        dispatcher.validate_routes()?;
        Ok(dispatcher)
    }

    /// Attaches a local alert journal.
    #[must_use]
    pub fn with_journal(mut self, journal: AlertJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Enables dry-run mode: alerts are recorded but no channel is contacted
    /// and the journal is not written.
    #[must_use]
    pub const fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Returns true in dry-run mode.
    #[must_use]
    pub const fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Returns the journal, if one is attached.
    #[must_use]
    pub const fn journal(&self) -> Option<&AlertJournal> {
        self.journal.as_ref()
    }

    // ============ Channel Management ============

    /// Registers a notification channel.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::DuplicateChannel` if the name is taken.
    pub fn add_channel(&mut self, channel: Box<dyn NotificationChannel>) -> Result<()> {
        let name = channel.name().to_string();
        if self.channels.contains_key(&name) {
            return Err(AlertError::DuplicateChannel { name });
        }
        info!(channel = %name, "added notification channel");
        self.channels.insert(name, channel);
        Ok(())
    }

    /// Returns the number of channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Returns the registered channel names, sorted.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Checks that every route and default channel refers to a registered
    /// channel.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::UnknownChannel` for the first unknown name.
    pub fn validate_routes(&self) -> Result<()> {
        let referenced = self
            .config
            .routes
            .iter()
            .flat_map(|r| r.channels.iter())
            .chain(self.config.default_channels.iter());

        for name in referenced {
            if !self.channels.contains_key(name) {
                return Err(AlertError::UnknownChannel { name: name.clone() });
            }
        }
        Ok(())
    }

    // ============ Routing ============

    /// Returns the channel names an alert is routed to.
    ///
    /// Every matching route contributes its channels (in table order,
    /// without repeats). If nothing matches, the default channels are used.
    #[must_use]
    pub fn route(&self, alert: &Alert) -> Vec<String> {
        let mut selected: Vec<String> = Vec::new();
        for route in self.config.routes.iter().filter(|r| r.matches(alert)) {
            for name in &route.channels {
                if !selected.contains(name) {
                    selected.push(name.clone());
                }
            }
        }

        if selected.is_empty() {
            selected.clone_from(&self.config.default_channels);
        }
        selected
    }

    // ============ Dispatch ============

    /// Records an alert locally and delivers it to its routed channels.
    ///
    /// Delivery outcomes are written into `alert.delivery`. Channel failures
    /// never propagate: they are logged and reflected in the report.
    pub async fn dispatch(&self, alert: &mut Alert) -> DispatchReport {
        self.counters
            .alerts_dispatched
            .fetch_add(1, Ordering::Relaxed);
        log_detected(alert);

        let routed = self.route(alert);
        if routed.is_empty() {
            warn!(alert_id = %alert.id, monitor = %alert.monitor_id, "alert matched no channels");
        }

        let outcomes: Vec<(String, DeliveryStatus, Option<String>)> = if self.dry_run {
            routed
                .iter()
                .map(|name| (name.clone(), DeliveryStatus::Skipped, Some("dry run".to_string())))
                .collect()
        } else {
            self.deliver(alert, &routed).await
        };

        let mut report = DispatchReport {
            alert_id: alert.id.clone(),
            routed,
            ..DispatchReport::default()
        };

        for (channel, status, message) in outcomes {
            match status {
                DeliveryStatus::Delivered => {
                    report.delivered += 1;
                    self.counters.deliveries_ok.fetch_add(1, Ordering::Relaxed);
                    self.ledger.lock().insert(&alert.id, &channel);
                }
                DeliveryStatus::Failed => {
                    report.failed += 1;
                    self.counters
                        .deliveries_failed
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(alert_id = %alert.id, channel = %channel, reason = ?message, "alert delivery failed");
                }
                DeliveryStatus::TimedOut => {
                    report.failed += 1;
                    self.counters
                        .deliveries_timed_out
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(alert_id = %alert.id, channel = %channel, "alert delivery timed out");
                }
                DeliveryStatus::Skipped => report.skipped += 1,
                DeliveryStatus::Duplicate => report.duplicates += 1,
            }
            alert.record_delivery(channel, status, message);
        }

        if !self.dry_run {
            if let Some(journal) = &self.journal {
                if let Err(e) = journal.append(alert) {
                    error!(alert_id = %alert.id, error = %e, "failed to journal alert");
                }
            }
        }

        debug!(
            alert_id = %report.alert_id,
            delivered = report.delivered,
            failed = report.failed,
            skipped = report.skipped,
            "dispatch complete"
        );
        report
    }

    async fn deliver(
        &self,
        alert: &Alert,
        routed: &[String],
    ) -> Vec<(String, DeliveryStatus, Option<String>)> {
        let timeout = self.config.channel_timeout();
        let mut outcomes = Vec::with_capacity(routed.len());
        let mut pending = Vec::new();

        for name in routed {
            let Some(channel) = self.channels.get(name) else {
                outcomes.push((
                    name.clone(),
                    DeliveryStatus::Failed,
                    Some("channel not registered".to_string()),
                ));
                continue;
            };
            if self.ledger.lock().contains(&alert.id, name) {
                outcomes.push((name.clone(), DeliveryStatus::Duplicate, None));
                continue;
            }
            if !channel.is_enabled() {
                outcomes.push((
                    name.clone(),
                    DeliveryStatus::Skipped,
                    Some("channel disabled".to_string()),
                ));
                continue;
            }
            pending.push(async move {
                let outcome = match tokio::time::timeout(timeout, channel.send(alert)).await {
                    Ok(Ok(result)) if result.success => (DeliveryStatus::Delivered, result.message),
                    Ok(Ok(result)) => (
                        DeliveryStatus::Failed,
                        result.message.or_else(|| Some("rejected".to_string())),
                    ),
                    Ok(Err(e)) => (DeliveryStatus::Failed, Some(e.to_string())),
                    Err(_) => (
                        DeliveryStatus::TimedOut,
                        Some(format!("no response within {}s", timeout.as_secs())),
                    ),
                };
                (name.clone(), outcome.0, outcome.1)
            });
        }

        outcomes.extend(join_all(pending).await);
        outcomes
    }

    /// Returns a snapshot of the cumulative counters.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            alerts_dispatched: self.counters.alerts_dispatched.load(Ordering::Relaxed),
            deliveries_ok: self.counters.deliveries_ok.load(Ordering::Relaxed),
            deliveries_failed: self.counters.deliveries_failed.load(Ordering::Relaxed),
            deliveries_timed_out: self.counters.deliveries_timed_out.load(Ordering::Relaxed),
        }
    }
}

fn log_detected(alert: &Alert) {
    match alert.severity {
        AlertSeverity::Critical | AlertSeverity::Emergency => error!(
            alert_id = %alert.id,
            monitor = %alert.monitor_id,
            category = %alert.category,
            key = %alert.key,
            severity = %alert.severity,
            observed = alert.observed,
            threshold = alert.threshold,
            "alert detected: {}", alert.title
        ),
        AlertSeverity::Warning => warn!(
            alert_id = %alert.id,
            monitor = %alert.monitor_id,
            category = %alert.category,
            key = %alert.key,
            severity = %alert.severity,
            observed = alert.observed,
            threshold = alert.threshold,
            "alert detected: {}", alert.title
        ),
        AlertSeverity::Info => info!(
            alert_id = %alert.id,
            monitor = %alert.monitor_id,
            category = %alert.category,
            key = %alert.key,
            observed = alert.observed,
            "alert detected: {}", alert.title
        ),
    }
}

//! Monitors: pull from a source, count, escalate and alert.
//!
//! A [`Monitor`] pairs an immutable [`MonitorDefinition`] with a
//! [`DataSource`]. Each cycle it pulls candidate events under a timeout
//! ([`Monitor::check`]) and then turns them into alerts
//! ([`Monitor::evaluate`]) using the shared tracker, cooldown manager and
//! dispatcher.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use warden_alerts::{Alert, AlertCategory, AlertDispatcher, Tier, TierSet};

use crate::cooldown::CooldownManager;
use crate::error::{ConfigError, MonitorError, Result, SourceError};
use crate::source::{DataSource, RawRecord};
use crate::tracker::EventTracker;

/// Upper bound for every configured duration (one year).
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// The built-in monitor kinds.
///
/// A kind supplies defaults (category, evaluation mode) and alert wording.
/// Parsing raw input stays in the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    /// Failed SSH logins per source address.
    SshFailures,
    /// Firewall-blocked connections per source address.
    FirewallBlocks,
    /// Failed health checks per service.
    ServiceHealth,
    /// Spend per budget.
    CostBudget,
    /// Changed files per watched path.
    FileIntegrity,
}

impl MonitorKind {
    /// All kinds.
    pub const ALL: [Self; 5] = [
        Self::SshFailures,
        Self::FirewallBlocks,
        Self::ServiceHealth,
        Self::CostBudget,
        Self::FileIntegrity,
    ];

    /// Returns the kind as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SshFailures => "ssh_failures",
            Self::FirewallBlocks => "firewall_blocks",
            Self::ServiceHealth => "service_health",
            Self::CostBudget => "cost_budget",
            Self::FileIntegrity => "file_integrity",
        }
    }

    /// Default routing category.
    #[must_use]
    pub const fn default_category(&self) -> AlertCategory {
        match self {
            Self::SshFailures | Self::FirewallBlocks | Self::FileIntegrity => {
                AlertCategory::Security
            }
            Self::ServiceHealth => AlertCategory::Health,
            Self::CostBudget => AlertCategory::Cost,
        }
    }

    /// Default evaluation mode.
    #[must_use]
    pub const fn default_evaluation(&self) -> EvaluationMode {
        match self {
            Self::CostBudget => EvaluationMode::Value,
            _ => EvaluationMode::Count,
        }
    }

    const fn noun(&self) -> &'static str {
        match self {
            Self::SshFailures => "failed login attempts",
            Self::FirewallBlocks => "blocked connections",
            Self::ServiceHealth => "failed health checks",
            Self::CostBudget => "spend",
            Self::FileIntegrity => "file changes",
        }
    }

    const fn preposition(&self) -> &'static str {
        match self {
            Self::SshFailures | Self::FirewallBlocks => "from",
            Self::ServiceHealth | Self::CostBudget => "for",
            Self::FileIntegrity => "under",
        }
    }
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a monitor turns events into an observed number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    /// Number of events for the key inside the window.
    Count,
    /// Latest value reported for the key in the current batch.
    Value,
}

/// Immutable description of one monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorDefinition {
    /// Unique id.
    pub id: String,
    /// Built-in kind.
    pub kind: MonitorKind,
    /// Routing category.
    pub category: AlertCategory,
    /// Count or value evaluation.
    pub evaluation: EvaluationMode,
    /// Escalation tiers.
    pub tiers: TierSet,
    /// Sliding window for count evaluation.
    pub window: Duration,
    /// Minimum spacing between same-tier alerts per key.
    pub cooldown: Duration,
    /// How often the monitor runs.
    pub interval: Duration,
    /// Time allowed for one source pull.
    pub source_timeout: Duration,
    /// Disabled monitors are registered but never run.
    pub enabled: bool,
}

impl MonitorDefinition {
    /// Creates a definition with the kind's defaults, a 10 minute window,
    /// a 1 hour cooldown, a 60s interval and a 10s source timeout.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: MonitorKind, tiers: TierSet) -> Self {
        Self {
            id: id.into(),
            kind,
            category: kind.default_category(),
            evaluation: kind.default_evaluation(),
            tiers,
            window: Duration::from_secs(600),
            cooldown: Duration::from_secs(3600),
            interval: Duration::from_secs(60),
            source_timeout: Duration::from_secs(10),
            enabled: true,
        }
    }

    /// Sets the category.
    #[must_use]
    pub const fn with_category(mut self, category: AlertCategory) -> Self {
        self.category = category;
        self
    }

    /// Sets the evaluation mode.
    #[must_use]
    pub const fn with_evaluation(mut self, evaluation: EvaluationMode) -> Self {
        self.evaluation = evaluation;
        self
    }

    /// Sets the window.
    #[must_use]
    pub const fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Sets the cooldown.
    #[must_use]
    pub const fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Sets the interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the source timeout.
    #[must_use]
    pub const fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    /// Enables or disables the monitor.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Checks the definition for values that would break evaluation.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidMonitor` describing the first problem.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidMonitor {
            monitor: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id cannot be empty"));
        }
        if self.evaluation == EvaluationMode::Count && self.window.is_zero() {
            return Err(invalid("window_secs must be positive for count monitors"));
        }
        if self.interval.is_zero() {
            return Err(invalid("interval_secs must be positive"));
        }
        if self.source_timeout.is_zero() {
            return Err(invalid("source_timeout_secs must be positive"));
        }
        let limits = [
            ("window_secs", self.window),
            ("cooldown_secs", self.cooldown),
            ("interval_secs", self.interval),
            ("source_timeout_secs", self.source_timeout),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, value)| *value > MAX_DURATION) {
            return Err(ConfigError::InvalidMonitor {
                monitor: self.id.clone(),
                reason: format!("{name} cannot exceed {} seconds", MAX_DURATION.as_secs()),
            });
        }
        Ok(())
    }
}

/// One normalized occurrence attributed to a monitor and key.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEvent {
    /// Owning monitor.
    pub monitor_id: String,
    /// Tracked key.
    pub key: String,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Observed value, for value monitors.
    pub value: Option<f64>,
    /// Context copied into alert fields.
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl CandidateEvent {
    /// Creates an event at `timestamp` with no value.
    #[must_use]
    pub fn new(monitor_id: impl Into<String>, key: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            monitor_id: monitor_id.into(),
            key: key.into(),
            timestamp,
            value: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Sets the value.
    #[must_use]
    pub const fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    fn from_record(monitor_id: &str, record: RawRecord, now: DateTime<Utc>) -> Self {
        Self {
            monitor_id: monitor_id.to_string(),
            key: record.key,
            timestamp: record.timestamp.unwrap_or(now),
            value: record.value,
            metadata: record.metadata,
        }
    }
}

/// Outcome of evaluating one batch of events.
#[derive(Debug, Default)]
pub struct Evaluation {
    /// Events considered.
    pub events: usize,
    /// Alerts emitted (with delivery outcomes filled in).
    pub alerts: Vec<Alert>,
    /// Crossings held back by cooldown.
    pub suppressed: usize,
    /// Emitted alerts that failed on at least one channel.
    pub failed_delivery: usize,
}

/// Shared engine parts a monitor evaluates against.
#[derive(Debug, Clone)]
pub struct MonitorContext {
    /// Window counts.
    pub tracker: Arc<EventTracker>,
    /// Cooldowns.
    pub cooldowns: Arc<CooldownManager>,
    /// Alert delivery.
    pub dispatcher: Arc<AlertDispatcher>,
}

impl MonitorContext {
    /// Bundles the engine parts.
    #[must_use]
    pub const fn new(
        tracker: Arc<EventTracker>,
        cooldowns: Arc<CooldownManager>,
        dispatcher: Arc<AlertDispatcher>,
    ) -> Self {
        Self {
            tracker,
            cooldowns,
            dispatcher,
        }
    }
}

/// A definition bound to its data source.
#[derive(Debug, Clone)]
pub struct Monitor {
    definition: Arc<MonitorDefinition>,
    source: Arc<dyn DataSource>,
}

struct KeyBatch<'a> {
    key: &'a str,
    events: usize,
    latest: &'a CandidateEvent,
    latest_value: Option<(DateTime<Utc>, f64)>,
}

impl Monitor {
    /// Binds `definition` to `source`.
    #[must_use]
    pub fn new(definition: MonitorDefinition, source: Arc<dyn DataSource>) -> Self {
        Self {
            definition: Arc::new(definition),
            source,
        }
    }

    /// Monitor id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.definition.id
    }

    /// The shared definition.
    #[must_use]
    pub fn definition(&self) -> &Arc<MonitorDefinition> {
        &self.definition
    }

    /// The data source.
    #[must_use]
    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.source
    }

    /// Pulls candidate events from the source.
    ///
    /// Records without a timestamp are stamped with `now`; records with an
    /// empty key are dropped.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Source` if the pull fails or exceeds the
    /// definition's source timeout.
    pub async fn check(&self, now: DateTime<Utc>) -> Result<Vec<CandidateEvent>> {
        let timeout = self.definition.source_timeout;
        let records = match tokio::time::timeout(timeout, self.source.pull()).await {
            Ok(Ok(records)) => records,
            Ok(Err(source)) => {
                return Err(MonitorError::Source {
                    monitor: self.definition.id.clone(),
                    source,
                });
            }
            Err(_) => {
                return Err(MonitorError::Source {
                    monitor: self.definition.id.clone(),
                    source: SourceError::Timeout { after: timeout },
                });
            }
        };

        let pulled = records.len();
        let events: Vec<_> = records
            .into_iter()
            .filter(|r| !r.key.trim().is_empty())
            .map(|r| CandidateEvent::from_record(&self.definition.id, r, now))
            .collect();
        if events.len() < pulled {
            debug!(monitor = %self.definition.id, dropped = pulled - events.len(), "dropped records without a key");
        }
        Ok(events)
    }

    /// Turns a batch of events into alerts.
    ///
    /// Every touched key is evaluated once per batch. Tiers are checked from
    /// most to least severe and only the first crossed tier is considered.
    /// Cooldown approval and recording happen together, before delivery, so
    /// a failed delivery never re-opens the cooldown.
    pub async fn evaluate(
        &self,
        events: &[CandidateEvent],
        ctx: &MonitorContext,
        now: DateTime<Utc>,
    ) -> Evaluation {
        let def = &*self.definition;
        let mut evaluation = Evaluation {
            events: events.len(),
            ..Evaluation::default()
        };

        if def.evaluation == EvaluationMode::Count {
            for event in events {
                ctx.tracker.record(&def.id, &event.key, event.timestamp);
            }
        }

        for batch in Self::group_by_key(events) {
            let observed = match def.evaluation {
                EvaluationMode::Count => {
                    ctx.tracker
                        .count_in_window_at(&def.id, batch.key, def.window, now) as f64
                }
                EvaluationMode::Value => {
                    let Some((_, value)) = batch.latest_value else {
                        warn!(monitor = %def.id, key = %batch.key, "value monitor got events without a value");
                        continue;
                    };
                    value
                }
            };

            let Some((tier_idx, tier)) = def.tiers.highest_crossed(observed) else {
                continue;
            };

            if !ctx
                .cooldowns
                .try_acquire(&def.id, batch.key, tier_idx, tier.severity, def.cooldown, now)
            {
                evaluation.suppressed += 1;
                debug!(
                    monitor = %def.id,
                    key = %batch.key,
                    tier = tier_idx,
                    observed,
                    "crossing suppressed by cooldown"
                );
                continue;
            }

            let mut alert = self.build_alert(&batch, tier_idx, tier, observed, now);
            let report = ctx.dispatcher.dispatch(&mut alert).await;
            if report.has_failures() {
                evaluation.failed_delivery += 1;
            }
            info!(
                monitor = %def.id,
                key = %batch.key,
                severity = %alert.severity,
                observed,
                delivered = report.delivered,
                "alert emitted"
            );
            evaluation.alerts.push(alert);
        }

        evaluation
    }

    /// Runs [`Monitor::check`] then [`Monitor::evaluate`].
    ///
    /// # Errors
    ///
    /// Returns the source error from `check`.
    pub async fn run_cycle(&self, ctx: &MonitorContext, now: DateTime<Utc>) -> Result<Evaluation> {
        let events = self.check(now).await?;
        Ok(self.evaluate(&events, ctx, now).await)
    }

    // Keys in first-seen order, with the newest event per key.
    fn group_by_key(events: &[CandidateEvent]) -> Vec<KeyBatch<'_>> {
        let mut order: Vec<KeyBatch<'_>> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();

        for event in events {
            let slot = *index.entry(event.key.as_str()).or_insert_with(|| {
                order.push(KeyBatch {
                    key: &event.key,
                    events: 0,
                    latest: event,
                    latest_value: None,
                });
                order.len() - 1
            });
            let batch = &mut order[slot];
            batch.events += 1;
            if let Some(value) = event.value {
                if batch.latest_value.is_none_or(|(ts, _)| event.timestamp >= ts) {
                    batch.latest_value = Some((event.timestamp, value));
                }
            }
            if event.timestamp >= batch.latest.timestamp {
                batch.latest = event;
            }
        }
        order
    }

    fn build_alert(
        &self,
        batch: &KeyBatch<'_>,
        tier_idx: usize,
        tier: Tier,
        observed: f64,
        now: DateTime<Utc>,
    ) -> Alert {
        let def = &*self.definition;
        let kind = def.kind;
        let summary = match def.evaluation {
            EvaluationMode::Count => format!(
                "{observed} {} {} {} in {}s",
                kind.noun(),
                kind.preposition(),
                batch.key,
                def.window.as_secs()
            ),
            EvaluationMode::Value => format!(
                "{} {} {} at {observed:.2}",
                kind.noun(),
                kind.preposition(),
                batch.key
            ),
        };
        let title = format!(
            "[{}] {}: {summary}",
            tier.severity.as_str().to_uppercase(),
            def.id
        );
        let message = format!(
            "{summary} reached tier {} (threshold {})",
            tier_idx + 1,
            tier.threshold
        );

        let metadata = batch.latest.metadata.iter().map(|(k, v)| {
            let text = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), text)
        });

        Alert::builder(&def.id, def.category, batch.key)
            .tier(tier_idx, tier)
            .observed(observed)
            .title(title)
            .message(message)
            .fields(metadata)
            .field("kind", kind.as_str())
            .field("window_secs", def.window.as_secs().to_string())
            .field("batch_events", batch.events.to_string())
            .at(now)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StaticSource;
    use chrono::TimeDelta;
    use warden_alerts::{AlertSeverity, DispatcherConfig, LogChannel};

    fn at(offset_secs: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + TimeDelta::seconds(offset_secs)
    }

    fn context() -> MonitorContext {
        let mut dispatcher = AlertDispatcher::new(DispatcherConfig {
            default_channels: vec!["log".to_string()],
            ..DispatcherConfig::default()
        });
        dispatcher.add_channel(Box::new(LogChannel::default())).unwrap();
        MonitorContext::new(
            Arc::new(EventTracker::new()),
            Arc::new(CooldownManager::new()),
            Arc::new(dispatcher),
        )
    }

    fn ssh_monitor(source: Arc<StaticSource>) -> Monitor {
        let tiers = TierSet::new(vec![
            Tier::new(5.0, AlertSeverity::Critical),
            Tier::new(20.0, AlertSeverity::Emergency),
        ])
        .unwrap();
        Monitor::new(MonitorDefinition::new("ssh", MonitorKind::SshFailures, tiers), source)
    }

    fn cost_monitor() -> Monitor {
        let tiers = TierSet::new(vec![
            Tier::new(3.0, AlertSeverity::Warning),
            Tier::new(5.0, AlertSeverity::Critical),
            Tier::new(10.0, AlertSeverity::Emergency),
        ])
        .unwrap();
        Monitor::new(
            MonitorDefinition::new("cost", MonitorKind::CostBudget, tiers),
            Arc::new(StaticSource::new("cost")),
        )
    }

    mod kind_tests {
        use super::*;

        #[test]
        fn kind_defaults() {
            assert_eq!(MonitorKind::CostBudget.default_evaluation(), EvaluationMode::Value);
            assert_eq!(MonitorKind::ServiceHealth.default_category(), AlertCategory::Health);
            for kind in MonitorKind::ALL {
                let json = serde_json::to_string(&kind).unwrap();
                assert_eq!(json, format!("\"{}\"", kind.as_str()));
            }
        }

        #[test]
        fn definition_validation() {
            let tiers = TierSet::new(vec![Tier::new(1.0, AlertSeverity::Warning)]).unwrap();
            let def = MonitorDefinition::new("ssh", MonitorKind::SshFailures, tiers.clone());
            assert!(def.validate().is_ok());

            let zero_window = def.clone().with_window(Duration::ZERO);
            assert!(zero_window.validate().is_err());

            let value_zero_window = MonitorDefinition::new("cost", MonitorKind::CostBudget, tiers)
                .with_window(Duration::ZERO);
            assert!(value_zero_window.validate().is_ok());

            assert!(def.with_interval(Duration::ZERO).validate().is_err());
        }
    }

    mod check_tests {
        use super::*;

        #[tokio::test]
        async fn check_stamps_missing_timestamps_and_drops_blank_keys() {
            let source = Arc::new(StaticSource::new("ssh"));
            source.push(vec![
                RawRecord::new("203.0.113.42"),
                RawRecord::new("  "),
                RawRecord::new("198.51.100.7").at(at(-5)),
            ]);
            let monitor = ssh_monitor(Arc::clone(&source));

            let events = monitor.check(at(0)).await.unwrap();
            assert_eq!(events.len(), 2);
            assert_eq!(events[0].timestamp, at(0));
            assert_eq!(events[1].timestamp, at(-5));
            assert_eq!(events[0].monitor_id, "ssh");
        }

        #[tokio::test(start_paused = true)]
        async fn check_times_out() {
            let source = Arc::new(StaticSource::new("ssh"));
            source.push_stall(Duration::from_secs(3600));
            let monitor = ssh_monitor(source);

            match monitor.check(at(0)).await {
                Err(MonitorError::Source { source, .. }) => assert!(source.is_timeout()),
                other => panic!("expected timeout, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn check_propagates_source_failure() {
            let source = Arc::new(StaticSource::new("ssh"));
            source.push_failure("bad batch");
            let monitor = ssh_monitor(source);
            assert!(monitor.check(at(0)).await.is_err());
        }
    }

    mod evaluate_tests {
        use super::*;

        fn events(key: &str, offsets: &[i64]) -> Vec<CandidateEvent> {
            offsets
                .iter()
                .map(|o| CandidateEvent::new("ssh", key, at(*o)))
                .collect()
        }

        #[tokio::test]
        async fn below_threshold_is_quiet() {
            let ctx = context();
            let monitor = ssh_monitor(Arc::new(StaticSource::new("ssh")));
            let result = monitor.evaluate(&events("k", &[0, 10, 20, 30]), &ctx, at(30)).await;
            assert!(result.alerts.is_empty());
            assert_eq!(result.events, 4);
        }

        #[tokio::test]
        async fn batch_crossing_alerts_once_at_highest_tier() {
            let ctx = context();
            let monitor = ssh_monitor(Arc::new(StaticSource::new("ssh")));
            let offsets: Vec<i64> = (0..25).collect();

            let result = monitor.evaluate(&events("k", &offsets), &ctx, at(30)).await;
            assert_eq!(result.alerts.len(), 1);
            assert_eq!(result.alerts[0].severity, AlertSeverity::Emergency);
            assert_eq!(result.alerts[0].tier, 1);
            assert!((result.alerts[0].observed - 25.0).abs() < f64::EPSILON);
        }

        #[tokio::test]
        async fn cooldown_suppresses_repeat() {
            let ctx = context();
            let monitor = ssh_monitor(Arc::new(StaticSource::new("ssh")));

            let first = monitor.evaluate(&events("k", &[0, 1, 2, 3, 4]), &ctx, at(4)).await;
            let second = monitor.evaluate(&events("k", &[60]), &ctx, at(60)).await;

            assert_eq!(first.alerts.len(), 1);
            assert!(second.alerts.is_empty());
            assert_eq!(second.suppressed, 1);
        }

        #[tokio::test]
        async fn keys_alert_independently() {
            let ctx = context();
            let monitor = ssh_monitor(Arc::new(StaticSource::new("ssh")));
            let mut batch = events("a", &[0, 1, 2, 3, 4]);
            batch.extend(events("b", &[0, 1, 2, 3, 4]));
            batch.extend(events("c", &[0]));

            let result = monitor.evaluate(&batch, &ctx, at(5)).await;
            let keys: Vec<_> = result.alerts.iter().map(|a| a.key.as_str()).collect();
            assert_eq!(keys, vec!["a", "b"]);
        }

        #[tokio::test]
        async fn value_mode_uses_latest_value() {
            let ctx = context();
            let monitor = cost_monitor();
            let batch = vec![
                CandidateEvent::new("cost", "daily", at(0)).with_value(12.0),
                CandidateEvent::new("cost", "daily", at(10)).with_value(4.0),
            ];

            let result = monitor.evaluate(&batch, &ctx, at(10)).await;
            assert_eq!(result.alerts.len(), 1);
            assert_eq!(result.alerts[0].severity, AlertSeverity::Warning);
            assert!(ctx.tracker.is_empty());
        }

        #[tokio::test]
        async fn alert_carries_metadata_fields() {
            let ctx = context();
            let monitor = ssh_monitor(Arc::new(StaticSource::new("ssh")));
            let mut batch = events("k", &[0, 1, 2, 3]);
            let mut last = CandidateEvent::new("ssh", "k", at(4));
            last.metadata.insert("user".to_string(), serde_json::json!("root"));
            last.metadata.insert("port".to_string(), serde_json::json!(22));
            batch.push(last);

            let result = monitor.evaluate(&batch, &ctx, at(4)).await;
            let alert = &result.alerts[0];
            assert_eq!(alert.fields.get("user").map(String::as_str), Some("root"));
            assert_eq!(alert.fields.get("port").map(String::as_str), Some("22"));
            assert_eq!(alert.fields.get("kind").map(String::as_str), Some("ssh_failures"));
            assert!(alert.title.starts_with("[CRITICAL] ssh: 5 failed login attempts from k"));
            assert!(alert.was_delivered());
        }
    }
}

//! Core types for the alerting system.
//!
//! This module provides the fundamental types used throughout the warden-alerts crate:
//! - [`AlertSeverity`]: The severity level of an alert
//! - [`AlertCategory`]: The static category used for channel routing
//! - [`Tier`] and [`TierSet`]: Escalation thresholds paired with severities
//! - [`Alert`]: A detected threshold crossing, with its delivery outcomes

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AlertError, Result};

/// The severity level of an alert.
///
/// Variants are declared from least to most severe, so the derived ordering
/// can be used directly for escalation checks.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational alert, no action required.
    Info,
    /// Warning alert, should be investigated.
    #[default]
    Warning,
    /// Critical alert, requires immediate attention.
    Critical,
    /// Emergency alert, ongoing incident.
    Emergency,
}

impl AlertSeverity {
    /// All severities, least severe first.
    pub const ALL: [Self; 4] = [Self::Info, Self::Warning, Self::Critical, Self::Emergency];

    /// Returns the severity as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
        }
    }

    /// Returns the priority of this severity (higher = more urgent).
    #[must_use]
    pub const fn priority(&self) -> u8 {
        match self {
            Self::Info => 1,
            Self::Warning => 2,
            Self::Critical => 3,
            Self::Emergency => 4,
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlertSeverity {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|sev| sev.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| AlertError::InvalidTier {
                reason: format!("unknown severity '{s}'"),
            })
    }
}

/// The category of signal an alert belongs to.
///
/// Categories drive channel routing; channel selection never looks at
/// alert content beyond category and severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCategory {
    /// Intrusion attempts, blocked traffic, integrity changes.
    Security,
    /// Spend and budget overruns.
    Cost,
    /// Service availability and host health.
    Health,
}

impl AlertCategory {
    /// Returns the category as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Cost => "cost",
            Self::Health => "health",
        }
    }
}

impl std::fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single escalation step: reaching `threshold` raises `severity`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    /// Count or value at which this tier is crossed (inclusive).
    pub threshold: f64,
    /// Severity of alerts raised at this tier.
    pub severity: AlertSeverity,
}

impl Tier {
    /// Creates a new tier.
    #[must_use]
    pub const fn new(threshold: f64, severity: AlertSeverity) -> Self {
        Self {
            threshold,
            severity,
        }
    }

    /// Returns true if `observed` reaches this tier.
    #[must_use]
    pub fn is_crossed(&self, observed: f64) -> bool {
        observed >= self.threshold
    }
}

/// An ordered, validated list of tiers.
///
/// Thresholds are strictly increasing and severities never decrease, so the
/// tier index doubles as an escalation rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Tier>", into = "Vec<Tier>")]
pub struct TierSet {
    tiers: Vec<Tier>,
}

impl TierSet {
    /// Validates and wraps a tier list.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidTier` if:
    /// - The list is empty
    /// - A threshold is not finite
    /// - Thresholds are not strictly increasing
    /// - A severity is lower than the one before it
    pub fn new(tiers: Vec<Tier>) -> Result<Self> {
        if tiers.is_empty() {
            return Err(AlertError::InvalidTier {
                reason: "at least one tier is required".to_string(),
            });
        }

        for tier in &tiers {
            if !tier.threshold.is_finite() {
                return Err(AlertError::InvalidTier {
                    reason: format!("threshold {} is not a finite number", tier.threshold),
                });
            }
        }

        for pair in tiers.windows(2) {
            let (lower, upper) = (&pair[0], &pair[1]);
            if upper.threshold <= lower.threshold {
                return Err(AlertError::InvalidTier {
                    reason: format!(
                        "thresholds must be strictly increasing ({} then {})",
                        lower.threshold, upper.threshold
                    ),
                });
            }
            if upper.severity < lower.severity {
                return Err(AlertError::InvalidTier {
                    reason: format!(
                        "severity must not decrease ({} then {})",
                        lower.severity, upper.severity
                    ),
                });
            }
        }

        Ok(Self { tiers })
    }

    /// Returns the most severe tier crossed by `observed`, with its index.
    ///
    /// Tiers are checked from most to least severe and the search stops at
    /// the first hit, so one crossing never counts toward several tiers.
    #[must_use]
    pub fn highest_crossed(&self, observed: f64) -> Option<(usize, Tier)> {
        self.tiers
            .iter()
            .enumerate()
            .rev()
            .find(|(_, tier)| tier.is_crossed(observed))
            .map(|(idx, tier)| (idx, *tier))
    }

    /// Returns the tier at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Tier> {
        self.tiers.get(index)
    }

    /// Number of tiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Always false; a `TierSet` holds at least one tier.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Iterates tiers from least to most severe.
    pub fn iter(&self) -> impl Iterator<Item = &Tier> {
        self.tiers.iter()
    }
}

impl TryFrom<Vec<Tier>> for TierSet {
    type Error = AlertError;

    fn try_from(tiers: Vec<Tier>) -> Result<Self> {
        Self::new(tiers)
    }
}

impl From<TierSet> for Vec<Tier> {
    fn from(set: TierSet) -> Self {
        set.tiers
    }
}

/// What happened when an alert was handed to one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// The channel accepted the alert.
    Delivered,
    /// The channel rejected the alert or errored.
    Failed,
    /// The channel did not answer within its timeout.
    TimedOut,
    /// Delivery was not attempted (dry run or disabled channel).
    Skipped,
    /// The alert had already been delivered to this channel.
    Duplicate,
}

impl DeliveryStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Skipped => "skipped",
            Self::Duplicate => "duplicate",
        }
    }

    /// Returns true if the status is a delivery failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Delivery outcome for a single channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    /// Channel name.
    pub channel: String,
    /// Outcome.
    pub status: DeliveryStatus,
    /// Error or informational message.
    pub message: Option<String>,
    /// When the outcome was recorded.
    pub at: DateTime<Utc>,
}

/// A detected threshold crossing that passed cooldown suppression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique identifier for this alert.
    pub id: String,
    /// The monitor that raised this alert.
    pub monitor_id: String,
    /// Routing category.
    pub category: AlertCategory,
    /// The tracked key (source address, service name, ...).
    pub key: String,
    /// Index of the crossed tier.
    pub tier: usize,
    /// Severity of the crossed tier.
    pub severity: AlertSeverity,
    /// One-line summary.
    pub title: String,
    /// Human-readable detail.
    pub message: String,
    /// Structured context for downstream consumers.
    pub fields: BTreeMap<String, String>,
    /// The count or value that crossed the tier.
    pub observed: f64,
    /// The threshold that was crossed.
    pub threshold: f64,
    /// When the crossing was detected.
    pub timestamp: DateTime<Utc>,
    /// Per-channel delivery outcomes, filled in by the dispatcher.
    #[serde(default)]
    pub delivery: Vec<DeliveryOutcome>,
}

impl Alert {
    /// Creates a new alert builder.
    pub fn builder(
        monitor_id: impl Into<String>,
        category: AlertCategory,
        key: impl Into<String>,
    ) -> AlertBuilder {
        AlertBuilder::new(monitor_id, category, key)
    }

    /// Records the outcome of a delivery attempt.
    pub fn record_delivery(
        &mut self,
        channel: impl Into<String>,
        status: DeliveryStatus,
        message: Option<String>,
    ) {
        self.delivery.push(DeliveryOutcome {
            channel: channel.into(),
            status,
            message,
            at: Utc::now(),
        });
    }

    /// Returns true if at least one channel accepted the alert.
    #[must_use]
    pub fn was_delivered(&self) -> bool {
        self.delivery
            .iter()
            .any(|d| d.status == DeliveryStatus::Delivered)
    }

    /// Returns the number of failed or timed-out deliveries.
    #[must_use]
    pub fn failed_deliveries(&self) -> usize {
        self.delivery.iter().filter(|d| d.status.is_failure()).count()
    }
}

/// Builder for creating [`Alert`] instances.
#[derive(Debug)]
pub struct AlertBuilder {
    monitor_id: String,
    category: AlertCategory,
    key: String,
    tier: usize,
    severity: AlertSeverity,
    title: Option<String>,
    message: String,
    fields: BTreeMap<String, String>,
    observed: f64,
    threshold: f64,
    timestamp: Option<DateTime<Utc>>,
}

impl AlertBuilder {
    fn new(monitor_id: impl Into<String>, category: AlertCategory, key: impl Into<String>) -> Self {
        Self {
            monitor_id: monitor_id.into(),
            category,
            key: key.into(),
            tier: 0,
            severity: AlertSeverity::Warning,
            title: None,
            message: String::new(),
            fields: BTreeMap::new(),
            observed: 0.0,
            threshold: 0.0,
            timestamp: None,
        }
    }

    /// Sets the crossed tier and takes its severity and threshold.
    #[must_use]
    pub const fn tier(mut self, index: usize, tier: Tier) -> Self {
        self.tier = index;
        self.severity = tier.severity;
        self.threshold = tier.threshold;
        self
    }

    /// Sets the observed count or value.
    #[must_use]
    pub const fn observed(mut self, observed: f64) -> Self {
        self.observed = observed;
        self
    }

    /// Sets the title.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the message.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Adds a structured field.
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Adds multiple structured fields.
    #[must_use]
    pub fn fields<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.fields
            .extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the detection time (defaults to now).
    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Builds the [`Alert`], assigning a fresh id.
    #[must_use]
    pub fn build(self) -> Alert {
        let title = self.title.unwrap_or_else(|| {
            format!(
                "[{}] {} {}",
                self.severity.as_str().to_uppercase(),
                self.monitor_id,
                self.key
            )
        });

        Alert {
            id: Uuid::new_v4().to_string(),
            monitor_id: self.monitor_id,
            category: self.category,
            key: self.key,
            tier: self.tier,
            severity: self.severity,
            title,
            message: self.message,
            fields: self.fields,
            observed: self.observed,
            threshold: self.threshold,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            delivery: Vec::new(),
        }
    }
}

//! Notification channels for alert delivery.
//!
//! This module provides the [`NotificationChannel`] trait and implementations
//! for delivering alerts to operator-facing destinations. Channels are built
//! once at startup from [`ChannelConfig`] and addressed by name.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::error::{AlertError, Result};
use crate::types::{Alert, AlertSeverity};

/// Boxed future returned by [`NotificationChannel::send`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<NotificationResult>> + Send + 'a>>;

/// Result of sending an alert through a channel.
#[derive(Debug, Clone)]
pub struct NotificationResult {
    /// Whether the alert was accepted.
    pub success: bool,
    /// The channel that processed this alert.
    pub channel: String,
    /// Optional message or error description.
    pub message: Option<String>,
    /// Response status code (if applicable).
    pub status_code: Option<u16>,
}

impl NotificationResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(channel: impl Into<String>) -> Self {
        Self {
            success: true,
            channel: channel.into(),
            message: None,
            status_code: None,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failure(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            channel: channel.into(),
            message: Some(message.into()),
            status_code: None,
        }
    }

    /// Sets the status code.
    #[must_use]
    pub const fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }
}

/// Trait for notification channels.
///
/// Implement this trait to deliver alerts to a new kind of destination.
/// The dispatcher wraps every call in its own timeout, so implementations
/// need not enforce one, although network channels usually do.
pub trait NotificationChannel: Send + Sync + fmt::Debug {
    /// Returns the name of this channel.
    fn name(&self) -> &str;

    /// Sends an alert through this channel.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::NotificationFailed` if the alert cannot be sent.
    fn send<'a>(&'a self, alert: &'a Alert) -> SendFuture<'a>;

    /// Returns true if this channel is enabled.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Declarative channel configuration, as it appears in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// Log alerts through `tracing`.
    Log {
        /// Channel name.
        name: String,
    },
    /// POST alerts as JSON to a URL.
    Webhook(WebhookConfig),
    /// Append alerts as JSON lines to a file.
    File {
        /// Channel name.
        name: String,
        /// File to append to.
        path: PathBuf,
    },
}

impl ChannelConfig {
    /// Returns the configured channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Log { name } | Self::File { name, .. } => name,
            Self::Webhook(config) => &config.name,
        }
    }

    /// Builds the channel described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidChannel` if the configuration is unusable.
    pub fn build(&self) -> Result<Box<dyn NotificationChannel>> {
        if self.name().is_empty() {
            return Err(AlertError::InvalidChannel {
                reason: "channel name cannot be empty".to_string(),
            });
        }

        match self {
            Self::Log { name } => Ok(Box::new(LogChannel::new(name.clone()))),
            Self::Webhook(config) => Ok(Box::new(WebhookChannel::new(config.clone())?)),
            Self::File { name, path } => Ok(Box::new(FileChannel::new(name.clone(), path.clone()))),
        }
    }
}

/// Configuration for a webhook channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// The name of this webhook.
    pub name: String,
    /// The URL to send alerts to.
    pub url: String,
    /// HTTP headers to include with requests.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Timeout in seconds for HTTP requests.
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
    /// Whether this channel is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

const fn default_webhook_timeout() -> u64 {
    10
}

const fn default_true() -> bool {
    true
}

impl WebhookConfig {
    /// Creates a new webhook configuration.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidChannel` if the URL is empty.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if url.is_empty() {
            return Err(AlertError::InvalidChannel {
                reason: "webhook URL cannot be empty".to_string(),
            });
        }

        Ok(Self {
            name: name.into(),
            url,
            headers: HashMap::new(),
            timeout_secs: default_webhook_timeout(),
            enabled: true,
        })
    }

    /// Adds a header to the configuration.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub const fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Sets whether the channel is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// A webhook notification channel.
///
/// Sends each alert as a JSON POST request to a configured URL. The body is
/// the generic [`WebhookPayload`]; shaping it for a particular chat product
/// is left to a relay on the receiving side.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookChannel {
    /// Creates a new webhook channel with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidChannel` if the URL is not http(s) or the
    /// HTTP client cannot be built.
    pub fn new(config: WebhookConfig) -> Result<Self> {
        if !config.url.starts_with("http://") && !config.url.starts_with("https://") {
            return Err(AlertError::InvalidChannel {
                reason: format!("webhook URL must start with http:// or https://: {}", config.url),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| AlertError::InvalidChannel {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { config, client })
    }

    /// Returns the webhook URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Formats the alert as JSON.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::SerializationError` if serialization fails.
    pub fn format_payload(&self, alert: &Alert) -> Result<String> {
        let payload = WebhookPayload::from_alert(alert);
        serde_json::to_string(&payload).map_err(AlertError::from)
    }
}

impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn send<'a>(&'a self, alert: &'a Alert) -> SendFuture<'a> {
        Box::pin(async move {
            let payload = WebhookPayload::from_alert(alert);

            let mut request = self.client.post(&self.config.url).json(&payload);
            for (key, value) in &self.config.headers {
                request = request.header(key, value);
            }

            let response = request
                .send()
                .await
                .map_err(|e| AlertError::NotificationFailed {
                    reason: format!("webhook request to {} failed: {e}", self.config.url),
                })?;

            let status = response.status();
            debug!(
                channel = %self.name(),
                alert_id = %alert.id,
                status = status.as_u16(),
                "webhook responded"
            );

            if status.is_success() {
                Ok(NotificationResult::success(self.name()).with_status_code(status.as_u16()))
            } else {
                Ok(NotificationResult::failure(
                    self.name(),
                    format!("webhook returned {status}"),
                )
                .with_status_code(status.as_u16()))
            }
        })
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

/// The JSON body posted by [`WebhookChannel`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    /// Payload format version.
    pub version: String,
    /// Sender identifier.
    pub source: String,
    /// Unique alert id, usable for receiver-side deduplication.
    pub alert_id: String,
    /// Monitor that raised the alert.
    pub monitor: String,
    /// Routing category.
    pub category: String,
    /// Severity label.
    pub severity: String,
    /// Tracked key.
    pub key: String,
    /// One-line summary.
    pub title: String,
    /// Detail text.
    pub message: String,
    /// Observed count or value.
    pub observed: f64,
    /// Crossed threshold.
    pub threshold: f64,
    /// Detection time, RFC 3339.
    pub timestamp: String,
    /// Structured context.
    pub fields: HashMap<String, String>,
}

impl WebhookPayload {
    /// Creates a payload from an alert.
    #[must_use]
    pub fn from_alert(alert: &Alert) -> Self {
        Self {
            version: "1".to_string(),
            source: "warden".to_string(),
            alert_id: alert.id.clone(),
            monitor: alert.monitor_id.clone(),
            category: alert.category.as_str().to_string(),
            severity: alert.severity.as_str().to_string(),
            key: alert.key.clone(),
            title: alert.title.clone(),
            message: alert.message.clone(),
            observed: alert.observed,
            threshold: alert.threshold,
            timestamp: alert.timestamp.to_rfc3339(),
            fields: alert
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// A channel that logs alerts through `tracing`.
#[derive(Debug, Clone)]
pub struct LogChannel {
    name: String,
    enabled: bool,
}

impl LogChannel {
    /// Creates a new log channel.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
        }
    }

    /// Sets whether the channel is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new("log")
    }
}

impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn send<'a>(&'a self, alert: &'a Alert) -> SendFuture<'a> {
        Box::pin(async move {
            match alert.severity {
                AlertSeverity::Critical | AlertSeverity::Emergency => {
                    error!(
                        alert_id = %alert.id,
                        monitor = %alert.monitor_id,
                        key = %alert.key,
                        severity = %alert.severity,
                        observed = alert.observed,
                        "ALERT {}", alert.title
                    );
                }
                AlertSeverity::Warning => {
                    warn!(
                        alert_id = %alert.id,
                        monitor = %alert.monitor_id,
                        key = %alert.key,
                        severity = %alert.severity,
                        observed = alert.observed,
                        "ALERT {}", alert.title
                    );
                }
                AlertSeverity::Info => {
                    info!(
                        alert_id = %alert.id,
                        monitor = %alert.monitor_id,
                        key = %alert.key,
                        observed = alert.observed,
                        "ALERT {}", alert.title
                    );
                }
            }

            Ok(NotificationResult::success(self.name()).with_message("logged to tracing"))
        })
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// A channel that appends each alert as one JSON line to a file.
///
/// Useful as a hand-off point for log shippers.
#[derive(Debug, Clone)]
pub struct FileChannel {
    name: String,
    path: PathBuf,
}

impl FileChannel {
    /// Creates a new file channel.
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Returns the output path.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl NotificationChannel for FileChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn send<'a>(&'a self, alert: &'a Alert) -> SendFuture<'a> {
        Box::pin(async move {
            let mut line = serde_json::to_vec(alert)?;
            line.push(b'\n');

            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }

            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(&line).await?;
            file.flush().await?;

            Ok(NotificationResult::success(self.name()))
        })
    }
}

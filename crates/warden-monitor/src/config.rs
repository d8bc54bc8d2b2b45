//! Daemon configuration.
//!
//! One TOML file describes the state directory, the alert journal, the
//! dispatch channels and routes, and every monitor. It is read once at
//! startup; anything invalid is a [`ConfigError`] and the daemon does not
//! start.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_alerts::{AlertCategory, AlertDispatcher, AlertJournal, DispatcherConfig, Tier, TierSet};

use crate::error::ConfigError;
use crate::monitor::{EvaluationMode, MAX_DURATION, Monitor, MonitorDefinition, MonitorKind};
use crate::registry::MonitorRegistry;
use crate::source::SourceConfig;

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/warden")
}

const fn default_persist_interval() -> u64 {
    300
}

const fn default_window() -> u64 {
    600
}

const fn default_cooldown() -> u64 {
    3600
}

const fn default_interval() -> u64 {
    60
}

const fn default_source_timeout() -> u64 {
    10
}

const fn default_true() -> bool {
    true
}

/// A commented example configuration, written by `wardend init-config`.
pub const SAMPLE_CONFIG: &str = r#"# Warden configuration.

# Where engine state (windows and cooldowns) is persisted.
state_dir = "/var/lib/warden"

# Persist at least this often, in addition to after cycles that alert.
persist_interval_secs = 300

# Every detected alert is appended here, delivered or not.
journal = "/var/lib/warden/alerts.jsonl"

[dispatch]
channel_timeout_secs = 10
default_channels = ["console"]

[[dispatch.channels]]
type = "log"
name = "console"

[[dispatch.channels]]
type = "webhook"
name = "security-hook"
url = "https://hooks.example.com/warden/security"

[[dispatch.routes]]
category = "security"
min_severity = "critical"
channels = ["console", "security-hook"]

[[monitors]]
id = "ssh_failures"
kind = "ssh_failures"
window_secs = 600
cooldown_secs = 3600
interval_secs = 30
tiers = [
    { threshold = 5, severity = "critical" },
    { threshold = 20, severity = "emergency" },
]

[monitors.source]
type = "json_lines"
path = "/var/log/warden/ssh-failures.jsonl"

[[monitors]]
id = "daily_cost"
kind = "cost_budget"
interval_secs = 900
cooldown_secs = 21600
tiers = [
    { threshold = 3.0, severity = "warning" },
    { threshold = 5.0, severity = "critical" },
    { threshold = 10.0, severity = "emergency" },
]

[monitors.source]
type = "http"
url = "http://127.0.0.1:9100/cost/daily"
"#;

/// Configuration of one monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Unique monitor id.
    pub id: String,
    /// Built-in kind.
    pub kind: MonitorKind,
    /// Overrides the kind's category.
    #[serde(default)]
    pub category: Option<AlertCategory>,
    /// Overrides the kind's evaluation mode.
    #[serde(default)]
    pub evaluation: Option<EvaluationMode>,
    /// Escalation tiers, least severe first.
    pub tiers: Vec<Tier>,
    /// Sliding window in seconds.
    #[serde(default = "default_window")]
    pub window_secs: u64,
    /// Cooldown in seconds.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    /// Run interval in seconds.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Source pull timeout in seconds.
    #[serde(default = "default_source_timeout")]
    pub source_timeout_secs: u64,
    /// Whether the monitor runs.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Where events come from.
    pub source: SourceConfig,
}

impl MonitorConfig {
    /// Builds the immutable definition.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidMonitor` for bad tiers or durations.
    pub fn definition(&self) -> Result<MonitorDefinition, ConfigError> {
        let tiers = TierSet::new(self.tiers.clone()).map_err(|e| ConfigError::InvalidMonitor {
            monitor: self.id.clone(),
            reason: e.to_string(),
        })?;

        let mut definition = MonitorDefinition::new(self.id.clone(), self.kind, tiers)
            .with_window(Duration::from_secs(self.window_secs))
            .with_cooldown(Duration::from_secs(self.cooldown_secs))
            .with_interval(Duration::from_secs(self.interval_secs))
            .with_source_timeout(Duration::from_secs(self.source_timeout_secs))
            .enabled(self.enabled);
        if let Some(category) = self.category {
            definition = definition.with_category(category);
        }
        if let Some(evaluation) = self.evaluation {
            definition = definition.with_evaluation(evaluation);
        }

        definition.validate()?;
        Ok(definition)
    }

    /// Builds the monitor with its data source.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the definition or source is invalid.
    pub fn build(&self) -> Result<Monitor, ConfigError> {
        self.build_with(false)
    }

    /// Builds the monitor; `replay_backlog` makes file sources start at the
    /// beginning of the file instead of its end.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the definition or source is invalid.
    pub fn build_with(&self, replay_backlog: bool) -> Result<Monitor, ConfigError> {
        let definition = self.definition()?;
        let source = self.source.build_with(&self.id, replay_backlog)?;
        Ok(Monitor::new(definition, source))
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Directory for the state snapshot.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Maximum time between snapshots, in seconds.
    #[serde(default = "default_persist_interval")]
    pub persist_interval_secs: u64,
    /// Alert journal file.
    #[serde(default)]
    pub journal: Option<PathBuf>,
    /// Channels and routes.
    #[serde(default)]
    pub dispatch: DispatcherConfig,
    /// Monitors.
    #[serde(default)]
    pub monitors: Vec<MonitorConfig>,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            persist_interval_secs: default_persist_interval(),
            journal: None,
            dispatch: DispatcherConfig::default(),
            monitors: Vec::new(),
        }
    }
}

impl WardenConfig {
    /// Loads and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parses and validates a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every setting by building the registry and dispatcher.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.persist_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "persist_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.dispatch.channel_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.channel_timeout_secs must be greater than 0".to_string(),
            ));
        }
        let max = MAX_DURATION.as_secs();
        if self.persist_interval_secs > max {
            return Err(ConfigError::Invalid(format!(
                "persist_interval_secs cannot exceed {max}"
            )));
        }
        if self.dispatch.channel_timeout_secs > max {
            return Err(ConfigError::Invalid(format!(
                "dispatch.channel_timeout_secs cannot exceed {max}"
            )));
        }
        self.build_registry()?;
        AlertDispatcher::from_config(self.dispatch.clone()).map_err(ConfigError::Dispatch)?;
        Ok(())
    }

    /// Maximum time between snapshots.
    #[must_use]
    pub const fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs)
    }

    /// Builds every configured monitor.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid or duplicate monitor.
    pub fn build_registry(&self) -> Result<MonitorRegistry, ConfigError> {
        self.build_registry_with(false)
    }

    /// Builds every configured monitor, optionally replaying file backlogs
    /// (see [`MonitorConfig::build_with`]).
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid or duplicate monitor.
    pub fn build_registry_with(&self, replay_backlog: bool) -> Result<MonitorRegistry, ConfigError> {
        let mut registry = MonitorRegistry::new();
        for monitor in &self.monitors {
            registry.register(monitor.build_with(replay_backlog)?)?;
        }
        Ok(registry)
    }

    /// Builds the dispatcher with its channels and journal.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Dispatch` if a channel or route is invalid.
    pub fn build_dispatcher(&self, dry_run: bool) -> Result<AlertDispatcher, ConfigError> {
        let mut dispatcher =
            AlertDispatcher::from_config(self.dispatch.clone()).map_err(ConfigError::Dispatch)?;
        if let Some(path) = &self.journal {
            dispatcher = dispatcher.with_journal(AlertJournal::new(path));
        }
        Ok(dispatcher.dry_run(dry_run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use test_case::test_case;
    use warden_alerts::AlertSeverity;

    const MINIMAL: &str = r#"
        [[monitors]]
        id = "fw"
        kind = "firewall_blocks"
        tiers = [{ threshold = 50, severity = "warning" }]

        [monitors.source]
        type = "static"
    "#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = WardenConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/warden"));
        assert_eq!(config.persist_interval(), Duration::from_secs(300));

        let monitor = &config.monitors[0];
        assert_eq!(monitor.window_secs, 600);
        assert_eq!(monitor.cooldown_secs, 3600);
        assert!(monitor.enabled);

        let def = monitor.definition().unwrap();
        assert_eq!(def.category, AlertCategory::Security);
        assert_eq!(def.evaluation, EvaluationMode::Count);
        assert_eq!(def.tiers.get(0).map(|t| t.severity), Some(AlertSeverity::Warning));
    }

    #[test]
    fn sample_config_is_valid() {
        let config = WardenConfig::from_toml(SAMPLE_CONFIG).unwrap();
        assert_eq!(config.monitors.len(), 2);
        assert_eq!(config.dispatch.channels.len(), 2);
        assert_eq!(
            config.monitors[1].definition().unwrap().evaluation,
            EvaluationMode::Value
        );
        let registry = config.build_registry().unwrap();
        assert!(registry.get("daily_cost").is_some());
    }

    #[test]
    fn overrides_apply() {
        let toml = r#"
            [[monitors]]
            id = "nginx"
            kind = "service_health"
            category = "security"
            evaluation = "value"
            tiers = [{ threshold = 1, severity = "critical" }]

            [monitors.source]
            type = "command"
            program = "/usr/local/bin/check-nginx"
        "#;
        let config = WardenConfig::from_toml(toml).unwrap();
        let def = config.monitors[0].definition().unwrap();
        assert_eq!(def.category, AlertCategory::Security);
        assert_eq!(def.evaluation, EvaluationMode::Value);
    }

    #[test_case(
        r#"{ threshold = 5, severity = "warning" }, { threshold = 5, severity = "critical" }"#;
        "equal thresholds"
    )]
    #[test_case(
        r#"{ threshold = 10, severity = "warning" }, { threshold = 5, severity = "critical" }"#;
        "decreasing thresholds"
    )]
    #[test_case(
        r#"{ threshold = 1, severity = "critical" }, { threshold = 5, severity = "warning" }"#;
        "decreasing severity"
    )]
    fn bad_tiers_rejected(tiers: &str) {
        let toml = format!(
            r#"
            [[monitors]]
            id = "ssh"
            kind = "ssh_failures"
            tiers = [{tiers}]

            [monitors.source]
            type = "static"
            "#
        );
        match WardenConfig::from_toml(&toml) {
            Err(ConfigError::InvalidMonitor { monitor, .. }) => assert_eq!(monitor, "ssh"),
            other => panic!("expected InvalidMonitor, got {other:?}"),
        }
    }

    #[test]
    fn empty_tiers_rejected() {
        let toml = MINIMAL.replace(r#"[{ threshold = 50, severity = "warning" }]"#, "[]");
        assert!(WardenConfig::from_toml(&toml).is_err());
    }

    #[test]
    fn duplicate_ids_rejected() {
        let toml = format!("{MINIMAL}\n{MINIMAL}");
        assert!(matches!(
            WardenConfig::from_toml(&toml),
            Err(ConfigError::DuplicateMonitor(_))
        ));
    }

    #[test_case("window_secs = 0"; "zero window")]
    #[test_case("interval_secs = 0"; "zero interval")]
    #[test_case("source_timeout_secs = 0"; "zero timeout")]
    #[test_case("interval_secs = 9223372036854775807"; "interval beyond a year")]
    #[test_case("window_secs = 31536001"; "window beyond a year")]
    #[test_case("cooldown_secs = 99999999999"; "cooldown beyond a year")]
    #[test_case("source_timeout_secs = 31536001"; "timeout beyond a year")]
    fn out_of_range_durations_rejected(setting: &str) {
        let toml = MINIMAL.replace("kind = \"firewall_blocks\"", &format!("kind = \"firewall_blocks\"\n{setting}"));
        assert!(matches!(
            WardenConfig::from_toml(&toml),
            Err(ConfigError::InvalidMonitor { .. })
        ));
    }

    #[test]
    fn route_to_unknown_channel_rejected() {
        let toml = format!(
            r#"
            [dispatch]
            default_channels = ["pager"]
            {MINIMAL}
            "#
        );
        assert!(matches!(
            WardenConfig::from_toml(&toml),
            Err(ConfigError::Dispatch(_))
        ));
    }

    #[test_case("persist_interval_secs = 0"; "zero persist interval")]
    #[test_case("persist_interval_secs = 9223372036854775807"; "huge persist interval")]
    #[test_case("[dispatch]\nchannel_timeout_secs = 31536001"; "huge channel timeout")]
    fn out_of_range_daemon_settings_rejected(setting: &str) {
        let toml = format!("{setting}\n{MINIMAL}");
        assert!(matches!(WardenConfig::from_toml(&toml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_kind_is_parse_error() {
        let toml = MINIMAL.replace("firewall_blocks", "disk_usage");
        assert!(matches!(WardenConfig::from_toml(&toml), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn from_file_reads_and_reports_missing() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        assert!(WardenConfig::from_file(file.path()).is_ok());

        let missing = WardenConfig::from_file("/nonexistent/warden.toml");
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn build_dispatcher_attaches_journal() {
        let toml = format!(
            r#"
            journal = "/tmp/warden-test/alerts.jsonl"
            {MINIMAL}
            "#
        );
        let config = WardenConfig::from_toml(&toml).unwrap();
        let dispatcher = config.build_dispatcher(true).unwrap();
        assert!(dispatcher.journal().is_some());
        assert!(dispatcher.is_dry_run());
    }
}

//! Monitor registry.

use std::collections::HashMap;
use std::time::Duration;

use tracing::info;

use crate::error::ConfigError;
use crate::monitor::Monitor;

/// The set of monitors known to a daemon, in registration order.
///
/// Built once at startup and then only read.
#[derive(Debug, Default, Clone)]
pub struct MonitorRegistry {
    monitors: Vec<Monitor>,
    index: HashMap<String, usize>,
}

impl MonitorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a monitor.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::DuplicateMonitor` if the id is taken, or the
    /// definition's validation error.
    pub fn register(&mut self, monitor: Monitor) -> Result<(), ConfigError> {
        monitor.definition().validate()?;
        let id = monitor.id().to_string();
        if self.index.contains_key(&id) {
            return Err(ConfigError::DuplicateMonitor(id));
        }

        info!(
            monitor = %id,
            kind = %monitor.definition().kind,
            source = %monitor.source().describe(),
            enabled = monitor.definition().enabled,
            "registered monitor"
        );
        self.index.insert(id, self.monitors.len());
        self.monitors.push(monitor);
        Ok(())
    }

    /// Looks up a monitor by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Monitor> {
        self.index.get(id).map(|idx| &self.monitors[*idx])
    }

    /// All monitors, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Monitor> {
        self.monitors.iter()
    }

    /// Enabled monitors, in registration order.
    pub fn enabled(&self) -> impl Iterator<Item = &Monitor> {
        self.monitors.iter().filter(|m| m.definition().enabled)
    }

    /// Number of registered monitors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    /// Window of a monitor, if registered.
    #[must_use]
    pub fn window_of(&self, id: &str) -> Option<Duration> {
        self.get(id).map(|m| m.definition().window)
    }

    /// Cooldown of a monitor, if registered.
    #[must_use]
    pub fn cooldown_of(&self, id: &str) -> Option<Duration> {
        self.get(id).map(|m| m.definition().cooldown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{MonitorDefinition, MonitorKind};
    use crate::source::StaticSource;
    use std::sync::Arc;
    use warden_alerts::{AlertSeverity, Tier, TierSet};

    fn monitor(id: &str, enabled: bool) -> Monitor {
        let tiers = TierSet::new(vec![Tier::new(1.0, AlertSeverity::Warning)]).unwrap();
        let def = MonitorDefinition::new(id, MonitorKind::FirewallBlocks, tiers)
            .with_window(Duration::from_secs(120))
            .enabled(enabled);
        Monitor::new(def, Arc::new(StaticSource::new(id)))
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = MonitorRegistry::new();
        registry.register(monitor("fw", true)).unwrap();
        registry.register(monitor("fw-lab", false)).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("fw").map(Monitor::id), Some("fw"));
        assert_eq!(registry.enabled().count(), 1);
        assert_eq!(registry.window_of("fw"), Some(Duration::from_secs(120)));
        assert!(registry.cooldown_of("missing").is_none());
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut registry = MonitorRegistry::new();
        registry.register(monitor("fw", true)).unwrap();
        match registry.register(monitor("fw", true)) {
            Err(ConfigError::DuplicateMonitor(id)) => assert_eq!(id, "fw"),
            other => panic!("expected DuplicateMonitor, got {other:?}"),
        }
    }

    #[test]
    fn invalid_definition_rejected() {
        let mut registry = MonitorRegistry::new();
        let tiers = TierSet::new(vec![Tier::new(1.0, AlertSeverity::Warning)]).unwrap();
        let def = MonitorDefinition::new("", MonitorKind::SshFailures, tiers);
        let result = registry.register(Monitor::new(def, Arc::new(StaticSource::new("x"))));
        assert!(result.is_err());
        assert!(registry.is_empty());
    }
}

//! Error types for the warden-monitor crate.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use warden_alerts::AlertError;
use warden_persist::PersistError;

/// Failure while pulling records from a data source.
///
/// Always transient: the monitor's cycle is marked failed and the source is
/// tried again on the next cycle.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Reading a file or spawning a process failed.
    #[error("io error on {}: {source}", path.display())]
    Io {
        /// The file or program involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The source did not answer in time.
    #[error("source timed out after {}s", after.as_secs_f64())]
    Timeout {
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The source answered with data that cannot be decoded as records.
    #[error("malformed source data: {reason}")]
    Malformed {
        /// What was wrong with the data.
        reason: String,
    },

    /// A command source exited unsuccessfully.
    #[error("command failed: {reason}")]
    Command {
        /// Exit status and stderr excerpt.
        reason: String,
    },

    /// An HTTP source request failed or returned an error status.
    #[error("http source failed: {reason}")]
    Http {
        /// The request error or status.
        reason: String,
    },
}

impl SourceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true if the error is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Invalid configuration. Only ever raised at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        /// The configuration file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid TOML for the expected schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A monitor definition is invalid.
    #[error("monitor '{monitor}': {reason}")]
    InvalidMonitor {
        /// The monitor id (may be empty).
        monitor: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Two monitors share an id.
    #[error("duplicate monitor id: {0}")]
    DuplicateMonitor(String),

    /// The dispatch section is invalid.
    #[error("invalid dispatch config: {0}")]
    Dispatch(#[source] AlertError),

    /// A top-level setting is invalid.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors raised by monitors, the state store and the daemon.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A monitor's data source failed.
    #[error("monitor '{monitor}' source error: {source}")]
    Source {
        /// The failing monitor.
        monitor: String,
        /// The source failure.
        #[source]
        source: SourceError,
    },

    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Reading or writing the state snapshot failed.
    #[error(transparent)]
    Persist(#[from] PersistError),

    /// Building or dispatching an alert failed.
    #[error(transparent)]
    Alert(#[from] AlertError),

    /// The daemon is already running.
    #[error("daemon is already running")]
    AlreadyRunning,
}

impl MonitorError {
    /// Returns true if the error only affects the current cycle.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Source { .. } | Self::Persist(_))
    }
}

/// Result type for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

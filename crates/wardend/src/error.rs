//! Error types for wardend commands.

use std::path::PathBuf;

use thiserror::Error;
use warden_monitor::{ConfigError, MonitorError};

/// Errors returned by the subcommands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Refused to overwrite an existing file.
    #[error("{} already exists (use --force to overwrite)", .0.display())]
    OutputExists(PathBuf),

    /// Filesystem failure.
    #[error("failed to write {}: {source}", path.display())]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Writing command output failed.
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),

    /// An alert could not be encoded.
    #[error("failed to encode alert: {0}")]
    Encode(#[from] serde_json::Error),

    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The daemon stopped with an error.
    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

/// Result type for wardend commands.
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_exists_mentions_force() {
        let err = CliError::OutputExists(PathBuf::from("/etc/warden/warden.toml"));
        assert_eq!(
            err.to_string(),
            "/etc/warden/warden.toml already exists (use --force to overwrite)"
        );
    }

    #[test]
    fn config_errors_pass_through() {
        let err: CliError = ConfigError::DuplicateMonitor("ssh".to_string()).into();
        assert_eq!(err.to_string(), ConfigError::DuplicateMonitor("ssh".to_string()).to_string());
    }
}

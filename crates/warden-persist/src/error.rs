//! Error types for the warden-persist crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading or writing a snapshot.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Filesystem operation failed.
    #[error("io error on {}: {source}", path.display())]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Snapshot contents could not be encoded or decoded.
    #[error("serialization error in {}: {source}", path.display())]
    Serialization {
        /// The snapshot file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl PersistError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn serialization(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Serialization {
            path: path.into(),
            source,
        }
    }

    /// Returns true if the snapshot exists but its contents are unusable.
    #[must_use]
    pub const fn is_corrupt(&self) -> bool {
        matches!(self, Self::Serialization { .. })
    }
}

/// Result type for persistence operations.
pub type Result<T> = std::result::Result<T, PersistError>;

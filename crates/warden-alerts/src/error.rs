//! Error types for the warden-alerts crate.

use thiserror::Error;

/// Errors that can occur in the alerting system.
#[derive(Debug, Error)]
pub enum AlertError {
    /// Invalid tier configuration.
    #[error("invalid tiers: {reason}")]
    InvalidTier {
        /// The reason the tiers are invalid.
        reason: String,
    },

    /// Invalid channel configuration.
    #[error("invalid channel: {reason}")]
    InvalidChannel {
        /// The reason the channel is invalid.
        reason: String,
    },

    /// A channel with the same name is already registered.
    #[error("duplicate channel: {name}")]
    DuplicateChannel {
        /// The channel name.
        name: String,
    },

    /// A route references a channel that was never registered.
    #[error("unknown channel: {name}")]
    UnknownChannel {
        /// The channel name.
        name: String,
    },

    /// Notification delivery failed.
    #[error("notification failed: {reason}")]
    NotificationFailed {
        /// The reason the notification failed.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Journal or file channel I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for AlertError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_tier() {
        let err = AlertError::InvalidTier {
            reason: "at least one tier is required".to_string(),
        };
        assert_eq!(err.to_string(), "invalid tiers: at least one tier is required");
    }

    #[test]
    fn error_display_unknown_channel() {
        let err = AlertError::UnknownChannel {
            name: "pager".to_string(),
        };
        assert_eq!(err.to_string(), "unknown channel: pager");
    }

    #[test]
    fn error_display_notification_failed() {
        let err = AlertError::NotificationFailed {
            reason: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "notification failed: connection refused");
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<String>("invalid json");
        assert!(json_err.is_err());
        let alert_err: AlertError = json_err.unwrap_err().into();
        assert!(matches!(alert_err, AlertError::SerializationError(_)));
    }
}

//! Alert types, notification channels and dispatch for warden.
//!
//! `warden-alerts` owns everything that happens after a monitor decides a
//! threshold was crossed: building the [`Alert`], choosing channels for it,
//! delivering it and recording the outcome.
//!
//! # Features
//!
//! - **Tiers**: Ordered thresholds paired with severities ([`TierSet`])
//! - **Static Routing**: Category and minimum severity select channels
//! - **Bounded Delivery**: Every channel send has its own timeout
//! - **Local Record**: Alerts are logged and journaled even if no channel accepts them
//!
//! # Example
//!
//! ```rust
//! use warden_alerts::{
//!     Alert, AlertCategory, AlertDispatcher, AlertSeverity, DispatcherConfig, Tier,
//!     channels::LogChannel,
//! };
//!
//! let runtime = tokio::runtime::Builder::new_current_thread()
//!     .enable_all()
//!     .build()
//!     .unwrap();
//!
//! let config = DispatcherConfig {
//!     default_channels: vec!["console".to_string()],
//!     ..DispatcherConfig::default()
//! };
//! let mut dispatcher = AlertDispatcher::new(config);
//! dispatcher.add_channel(Box::new(LogChannel::new("console"))).unwrap();
//!
//! let mut alert = Alert::builder("ssh_failures", AlertCategory::Security, "203.0.113.42")
//!     .tier(0, Tier::new(5.0, AlertSeverity::Warning))
//!     .observed(5.0)
//!     .build();
//!
//! let report = runtime.block_on(dispatcher.dispatch(&mut alert));
//! assert_eq!(report.delivered, 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod channels;
pub mod dispatcher;
pub mod error;
pub mod journal;
pub mod types;

// Re-export main types at crate root
pub use channels::{
    ChannelConfig, FileChannel, LogChannel, NotificationChannel, NotificationResult,
    WebhookChannel, WebhookConfig, WebhookPayload,
};
pub use dispatcher::{
    AlertDispatcher, DispatchReport, DispatchStats, DispatcherConfig, RouteConfig,
};
pub use error::{AlertError, Result};
pub use journal::AlertJournal;
pub use types::{
    Alert, AlertBuilder, AlertCategory, AlertSeverity, DeliveryOutcome, DeliveryStatus, Tier,
    TierSet,
};

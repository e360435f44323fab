//! # Vigil Alerts - Threshold rules over live metrics
//!
//! The [`AlertEngine`] reads metric values from a
//! [`MetricSource`](vigil_types::MetricSource), evaluates each enabled
//! [`AlertRule`] and fans fired alerts out to the rule's notification
//! channels.
//!
//! ```text
//!   MetricSource ──► check_alerts ──► cooldown gate ──► Alert (active)
//!                                                         │
//!                                  ┌──────────────────────┼────────────┐
//!                                  ▼                      ▼            ▼
//!                               Email                  Slack  ...  Dashboard
//! ```
//!
//! Alerts move Active → Acknowledged → Resolved. Resolution removes the
//! alert from the active set but keeps it in bounded history.

pub mod channel;
pub mod engine;
pub mod error;
pub mod types;

pub use channel::{ChannelError, LogChannel, MemoryChannel, NotificationChannel};
pub use engine::{AlertEngine, AlertEngineConfig, AlertStats};
pub use error::{AlertError, AlertResult};
pub use types::{
    Alert, AlertChannelKind, AlertId, AlertPayload, AlertRule, AlertSeverity, AlertStatus,
    ComparisonOperator,
};

//! Notification channel contract.
//!
//! Concrete delivery (mail, chat, webhook, SMS) lives outside this crate.
//! The engine only knows the normalized [`AlertPayload`] and isolates the
//! failure of one channel from the others.

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::types::{AlertChannelKind, AlertPayload, AlertSeverity};

/// Delivery failure reported by a channel.
#[derive(Debug, Clone, Error)]
#[error("{channel} delivery failed: {reason}")]
pub struct ChannelError {
    pub channel: AlertChannelKind,
    pub reason: String,
}

/// A destination for alert notifications.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Kind this channel serves. One channel is registered per kind.
    fn kind(&self) -> AlertChannelKind;

    /// Deliver a payload.
    async fn send(&self, payload: &AlertPayload) -> Result<(), ChannelError>;
}

/// Writes alerts to the structured log. Serves as the dashboard sink.
pub struct LogChannel {
    kind: AlertChannelKind,
}

impl LogChannel {
    pub fn new(kind: AlertChannelKind) -> Self {
        Self { kind }
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new(AlertChannelKind::Dashboard)
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    fn kind(&self) -> AlertChannelKind {
        self.kind
    }

    async fn send(&self, payload: &AlertPayload) -> Result<(), ChannelError> {
        match payload.severity {
            AlertSeverity::Critical | AlertSeverity::Error => error!(
                channel = %self.kind,
                alert_id = %payload.alert_id,
                rule = %payload.rule_name,
                metric = %payload.metric,
                value = payload.value,
                "{}", payload.message
            ),
            AlertSeverity::Warning => warn!(
                channel = %self.kind,
                alert_id = %payload.alert_id,
                rule = %payload.rule_name,
                metric = %payload.metric,
                value = payload.value,
                "{}", payload.message
            ),
            AlertSeverity::Info => info!(
                channel = %self.kind,
                alert_id = %payload.alert_id,
                rule = %payload.rule_name,
                metric = %payload.metric,
                value = payload.value,
                "{}", payload.message
            ),
        }
        Ok(())
    }
}

/// Records payloads in memory (for testing). Can be told to fail.
pub struct MemoryChannel {
    kind: AlertChannelKind,
    fail: bool,
    delivered: Mutex<Vec<AlertPayload>>,
}

impl MemoryChannel {
    pub fn new(kind: AlertChannelKind) -> Self {
        Self {
            kind,
            fail: false,
            delivered: Mutex::new(Vec::new()),
        }
    }

    /// A channel whose every delivery fails.
    pub fn failing(kind: AlertChannelKind) -> Self {
        Self {
            fail: true,
            ..Self::new(kind)
        }
    }

    pub fn delivered(&self) -> Vec<AlertPayload> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl NotificationChannel for MemoryChannel {
    fn kind(&self) -> AlertChannelKind {
        self.kind
    }

    async fn send(&self, payload: &AlertPayload) -> Result<(), ChannelError> {
        if self.fail {
            return Err(ChannelError {
                channel: self.kind,
                reason: "simulated outage".to_string(),
            });
        }
        self.delivered.lock().push(payload.clone());
        Ok(())
    }
}

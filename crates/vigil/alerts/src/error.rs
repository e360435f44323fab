//! Error types for vigil-alerts.

use thiserror::Error;

use crate::types::AlertId;

#[derive(Debug, Error)]
pub enum AlertError {
    /// No active alert with this id.
    #[error("active alert not found: {0}")]
    NotFound(AlertId),

    /// No rule with this name.
    #[error("alert rule not found: {0}")]
    RuleNotFound(String),

    /// Rule definition rejected.
    #[error("invalid alert rule '{name}': {reason}")]
    InvalidRule { name: String, reason: String },
}

/// Result type for alert operations.
pub type AlertResult<T> = Result<T, AlertError>;

//! Error types for vigil-daemon

use thiserror::Error;
use vigil_types::{Classify, FailureKind};

use crate::validation::ValidationError;

/// Daemon errors
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid lifecycle transition: cannot {action} while {state}")]
    InvalidState { action: &'static str, state: String },

    #[error("System probe error: {0}")]
    Probe(String),

    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Failure of an external data provider.
#[derive(Debug, Clone, Error)]
#[error("provider '{provider_id}' failed: {message}")]
pub struct DependencyError {
    pub provider_id: String,
    pub message: String,
    pub kind: FailureKind,
}

impl DependencyError {
    /// A failure worth retrying.
    pub fn transient(provider_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            message: message.into(),
            kind: FailureKind::Transient,
        }
    }

    /// A failure that retrying will not fix (bad request, unknown endpoint).
    pub fn permanent(provider_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            message: message.into(),
            kind: FailureKind::Permanent,
        }
    }
}

impl Classify for DependencyError {
    fn failure_kind(&self) -> FailureKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_error_kinds() {
        let err = DependencyError::transient("weather", "timeout");
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "provider 'weather' failed: timeout");

        let err = DependencyError::permanent("weather", "404");
        assert_eq!(err.failure_kind(), FailureKind::Permanent);

        let daemon: DaemonError = err.into();
        assert!(matches!(daemon, DaemonError::Dependency(_)));
    }
}

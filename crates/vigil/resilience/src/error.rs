//! Error types for vigil-resilience.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// A call was rejected because the circuit is open.
///
/// Distinct from whatever failure opened the circuit: the protected
/// operation was not invoked at all.
#[derive(Debug, Clone, Error)]
#[error("circuit breaker '{name}' is open after {failure_count} failures")]
pub struct CircuitOpenError {
    /// Name of the breaker that rejected the call.
    pub name: String,

    /// Failures counted when the circuit opened.
    pub failure_count: u32,

    /// Time left until a trial call is admitted, if known.
    pub retry_after: Option<Duration>,

    /// Last counted failure, for diagnostics.
    pub last_error: Option<String>,
}

/// Error returned by calls routed through resilience layers.
#[derive(Debug)]
pub enum ResilienceError<E> {
    /// Rejected without invoking the operation.
    CircuitOpen(CircuitOpenError),

    /// The operation itself failed.
    Operation(E),
}

impl<E> ResilienceError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    pub fn as_operation(&self) -> Option<&E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::CircuitOpen(_) => None,
        }
    }

    /// Consume the error, returning the operation failure if there is one.
    pub fn into_operation(self) -> Result<E, CircuitOpenError> {
        match self {
            Self::Operation(e) => Ok(e),
            Self::CircuitOpen(e) => Err(e),
        }
    }
}

impl<E> From<CircuitOpenError> for ResilienceError<E> {
    fn from(e: CircuitOpenError) -> Self {
        Self::CircuitOpen(e)
    }
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitOpen(e) => write!(f, "{e}"),
            Self::Operation(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CircuitOpen(e) => Some(e),
            Self::Operation(e) => Some(e),
        }
    }
}

//! Failure classification.
//!
//! Resilience layers never inspect concrete error types. They ask the error
//! for its [`FailureKind`] and only intercept the kinds they were configured
//! for; everything else passes through untouched.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification of an operation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Dependency hiccup that may succeed on a later attempt.
    Transient,

    /// Failure that will not go away by trying again.
    Permanent,

    /// Data was rejected by validation.
    Validation,

    /// Bug or invariant violation inside the process.
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Permanent => write!(f, "permanent"),
            FailureKind::Validation => write!(f, "validation"),
            FailureKind::Internal => write!(f, "internal"),
        }
    }
}

/// Errors that can be routed by resilience layers.
pub trait Classify {
    fn failure_kind(&self) -> FailureKind;

    fn is_transient(&self) -> bool {
        self.failure_kind() == FailureKind::Transient
    }
}

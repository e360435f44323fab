//! Bounded retry with backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use vigil_types::{Classify, FailureKind};

use crate::config::{BackoffStrategy, RetryConfig};

/// Information handed to the retry observer before each backoff sleep.
#[derive(Debug, Clone)]
pub struct RetryEvent {
    /// Name of the retry handler.
    pub handler: String,

    /// Attempt that just failed (1-based).
    pub attempt: u32,

    pub max_attempts: u32,

    /// Delay before the next attempt.
    pub delay: Duration,

    /// Rendered error of the failed attempt.
    pub error: String,
}

/// Hook invoked before each retry, for logging or metrics.
pub type RetryObserver = Arc<dyn Fn(&RetryEvent) + Send + Sync>;

/// Invokes an operation up to `max_attempts` times.
///
/// Non-retryable failures and the failure of the last attempt are returned
/// unchanged to the caller.
pub struct RetryHandler {
    name: String,
    config: RetryConfig,
    observer: Option<RetryObserver>,
}

impl RetryHandler {
    pub fn new(name: impl Into<String>, mut config: RetryConfig) -> Self {
        config.max_attempts = config.max_attempts.max(1);
        Self {
            name: name.into(),
            config,
            observer: None,
        }
    }

    /// Attach an observer called before every backoff sleep.
    pub fn with_observer(mut self, observer: RetryObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// runs out of attempts.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::fmt::Display,
    {
        let max_attempts = self.config.max_attempts;
        let mut attempt = 1;

        loop {
            let error = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(handler = %self.name, attempt = attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !self.config.is_retryable(error.failure_kind()) {
                debug!(
                    handler = %self.name,
                    kind = %error.failure_kind(),
                    "Failure is not retryable"
                );
                return Err(error);
            }

            if attempt >= max_attempts {
                warn!(
                    handler = %self.name,
                    attempts = attempt,
                    error = %error,
                    "Retry attempts exhausted"
                );
                return Err(error);
            }

            let delay = self.config.strategy.delay(attempt, max_attempts);
            if let Some(observer) = &self.observer {
                observer(&RetryEvent {
                    handler: self.name.clone(),
                    attempt,
                    max_attempts,
                    delay,
                    error: error.to_string(),
                });
            }
            debug!(
                handler = %self.name,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after failure"
            );

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    pub fn status(&self) -> RetryStatus {
        RetryStatus {
            name: self.name.clone(),
            max_attempts: self.config.max_attempts,
            strategy: self.config.strategy.clone(),
            retryable: self.config.retryable.clone(),
            has_observer: self.observer.is_some(),
        }
    }
}

/// Read-only view of a retry handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryStatus {
    pub name: String,
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
    pub retryable: Vec<FailureKind>,
    pub has_observer: bool,
}

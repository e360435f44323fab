//! Circuit breaker pattern for resilience.
//!
//! Prevents cascading failures by tracking consecutive failures of a
//! dependency and failing fast while it is considered down.
//!
//! All state lives behind one mutex so transitions are strictly
//! consistent: two concurrent callers can never both be admitted as the
//! half-open trial call.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vigil_types::Classify;

use crate::config::CircuitBreakerConfig;
use crate::error::{CircuitOpenError, ResilienceError};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    Closed,

    /// Circuit is open, requests are blocked.
    Open,

    /// Circuit is testing whether the dependency recovered.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u64,
    /// Monotonic time of the last counted failure.
    last_failure: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
    last_error: Option<String>,
    /// A half-open trial call is currently running.
    trial_in_flight: bool,
    last_transition: DateTime<Utc>,
}

/// Circuit breaker for a single dependency.
///
/// Tracks failures and successes, transitioning between states:
/// - Closed: Normal operation, calls allowed, failures counted
/// - Open: Too many failures, calls rejected without running
/// - Half-Open: Recovery timeout elapsed, exactly one trial call allowed
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

/// Admission ticket for one call through the breaker.
///
/// Settle it with [`success`](Self::success), [`failure`](Self::failure) or
/// [`release`](Self::release). Dropping an unsettled trial permit frees the
/// trial slot so a cancelled call cannot wedge the breaker half-open.
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    /// Whether this is the half-open trial call.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self, error: &str) {
        self.settled = true;
        self.breaker.on_failure(self.trial, error);
    }

    /// The call ended with an error the breaker does not count.
    pub fn release(mut self) {
        self.settled = true;
        self.breaker.on_release(self.trial);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_release(self.trial);
        }
    }
}

impl CircuitBreaker {
    /// Create a new closed circuit breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
                last_failure_time: None,
                last_error: None,
                trial_in_flight: false,
                last_transition: Utc::now(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Ask for permission to run one call.
    ///
    /// Moves Open to HalfOpen once the recovery timeout has elapsed since
    /// the last failure, and hands out the single trial slot.
    pub fn acquire(&self) -> Result<CallPermit<'_>, CircuitOpenError> {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => Ok(self.permit(false)),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(self.config.recovery_timeout);

                if elapsed >= self.config.recovery_timeout {
                    info!(
                        breaker = %self.name,
                        "Circuit breaker transitioning to half-open after timeout"
                    );
                    Self::transition_to(&mut inner, CircuitState::HalfOpen);
                    inner.trial_in_flight = true;
                    Ok(self.permit(true))
                } else {
                    Err(self.rejection(&inner, Some(self.config.recovery_timeout - elapsed)))
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(self.rejection(&inner, None))
                } else {
                    inner.trial_in_flight = true;
                    Ok(self.permit(true))
                }
            }
        }
    }

    /// Run `op` under the breaker.
    ///
    /// Only failures whose kind is listed in the configured `expected` set
    /// are counted; anything else is returned untouched.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::fmt::Display,
    {
        let permit = self.acquire()?;

        match op().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                if self.config.counts(e.failure_kind()) {
                    permit.failure(&e.to_string());
                } else {
                    permit.release();
                }
                Err(ResilienceError::Operation(e))
            }
        }
    }

    /// Force the circuit to a specific state.
    pub fn force_state(&self, new_state: CircuitState) {
        let mut inner = self.inner.lock();
        info!(
            breaker = %self.name,
            old_state = %inner.state,
            new_state = %new_state,
            "Circuit breaker state forced"
        );
        Self::transition_to(&mut inner, new_state);
        if new_state == CircuitState::Open {
            inner.last_failure = Some(Instant::now());
            inner.last_failure_time = Some(Utc::now());
        }
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&self) {
        self.force_state(CircuitState::Closed);
    }

    /// Snapshot of the breaker for observability.
    pub fn status(&self) -> CircuitBreakerStatus {
        let inner = self.inner.lock();
        CircuitBreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout_ms: self.config.recovery_timeout.as_millis() as u64,
            last_failure_time: inner.last_failure_time,
            last_transition: inner.last_transition,
        }
    }

    fn permit(&self, trial: bool) -> CallPermit<'_> {
        CallPermit {
            breaker: self,
            trial,
            settled: false,
        }
    }

    fn rejection(&self, inner: &BreakerInner, retry_after: Option<Duration>) -> CircuitOpenError {
        debug!(breaker = %self.name, state = %inner.state, "Call rejected by open circuit");
        CircuitOpenError {
            name: self.name.clone(),
            failure_count: inner.failure_count,
            retry_after,
            last_error: inner.last_error.clone(),
        }
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        inner.success_count += 1;

        if trial {
            inner.trial_in_flight = false;
            if inner.state == CircuitState::HalfOpen {
                info!(breaker = %self.name, "Circuit breaker closing after successful trial call");
                Self::transition_to(&mut inner, CircuitState::Closed);
            }
        }
    }

    fn on_failure(&self, trial: bool, error: &str) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.last_failure_time = Some(Utc::now());
        inner.last_error = Some(error.to_string());

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        error = error,
                        "Circuit breaker opening due to failures"
                    );
                    Self::transition_to(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen if trial => {
                warn!(
                    breaker = %self.name,
                    error = error,
                    "Circuit breaker re-opening after half-open failure"
                );
                inner.trial_in_flight = false;
                Self::transition_to(&mut inner, CircuitState::Open);
            }
            // A call admitted before the circuit opened; the failure is
            // recorded but the state is already decided.
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn on_release(&self, trial: bool) {
        if trial {
            self.inner.lock().trial_in_flight = false;
        }
    }

    /// Transition to a new state, resetting counters as needed.
    fn transition_to(inner: &mut BreakerInner, new_state: CircuitState) {
        inner.state = new_state;
        inner.last_transition = Utc::now();

        match new_state {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.trial_in_flight = false;
            }
            CircuitState::Open => {
                inner.trial_in_flight = false;
            }
            CircuitState::HalfOpen => {}
        }
    }
}

/// Statistics for a circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    /// Breaker name.
    pub name: String,

    /// Current state.
    pub state: CircuitState,

    /// Consecutive counted failures.
    pub failure_count: u32,

    /// Total successful calls.
    pub success_count: u64,

    /// Failures needed to open.
    pub failure_threshold: u32,

    /// Open duration before a trial call.
    pub recovery_timeout_ms: u64,

    /// Wall-clock time of the last counted failure.
    pub last_failure_time: Option<DateTime<Utc>>,

    /// Time of last state transition.
    pub last_transition: DateTime<Utc>,
}

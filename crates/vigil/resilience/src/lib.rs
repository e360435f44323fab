//! # Vigil Resilience - Protecting calls to unreliable dependencies
//!
//! Three independent layers and a registry that composes them:
//!
//! - [`CircuitBreaker`]: stops calling a dependency after repeated failures
//!   and probes recovery with a single trial call
//! - [`RetryHandler`]: bounded attempts with fixed, linear or jittered
//!   exponential backoff
//! - [`FallbackHandler`]: substitute result when everything else failed
//! - [`ResilienceCoordinator`]: named registry and `resilient_call`
//!
//! ```text
//!   resilient_call(policy, args, op)
//!       │
//!       └──► fallback ──► circuit breaker ──► retry ──► op()
//! ```
//!
//! Layers only intercept failures whose [`FailureKind`](vigil_types::FailureKind)
//! they were configured for. Everything else reaches the caller untouched.
//!
//! ## Example
//!
//! ```rust,no_run
//! use vigil_resilience::{CallPolicy, CircuitBreakerConfig, ResilienceCoordinator, RetryConfig};
//! # use vigil_types::{Classify, FailureKind};
//! # #[derive(Debug)] struct Down;
//! # impl std::fmt::Display for Down { fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "down") } }
//! # impl Classify for Down { fn failure_kind(&self) -> FailureKind { FailureKind::Transient } }
//!
//! # async fn example() {
//! let coordinator: ResilienceCoordinator<(), String> = ResilienceCoordinator::new();
//! coordinator.create_circuit_breaker("weather", CircuitBreakerConfig::default());
//! coordinator.create_retry_handler("weather", RetryConfig::default());
//!
//! let policy = CallPolicy::new().circuit_breaker("weather").retry("weather");
//! let result = coordinator
//!     .resilient_call(&policy, &(), || async { Err::<String, _>(Down) })
//!     .await;
//! assert!(result.is_err());
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fallback;
pub mod retry;

pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitBreakerStatus, CircuitState};
pub use config::{BackoffStrategy, CircuitBreakerConfig, RetryConfig};
pub use coordinator::{CallPolicy, CoordinatorStatus, ResilienceCoordinator};
pub use error::{CircuitOpenError, ResilienceError};
pub use fallback::{FallbackConfig, FallbackFn, FallbackHandler, FallbackStatus};
pub use retry::{RetryEvent, RetryHandler, RetryObserver, RetryStatus};

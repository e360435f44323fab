//! Named registry composing breakers, retries and fallbacks.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vigil_types::{Classify, ComponentHealth, HealthStatus};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerStatus, CircuitState};
use crate::config::{CircuitBreakerConfig, RetryConfig};
use crate::error::ResilienceError;
use crate::fallback::{FallbackConfig, FallbackHandler, FallbackStatus};
use crate::retry::{RetryHandler, RetryStatus};

/// Which registered components protect a call. Any layer may be omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallPolicy {
    pub circuit_breaker: Option<String>,
    pub retry: Option<String>,
    pub fallback: Option<String>,
}

impl CallPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn circuit_breaker(mut self, name: impl Into<String>) -> Self {
        self.circuit_breaker = Some(name.into());
        self
    }

    pub fn retry(mut self, name: impl Into<String>) -> Self {
        self.retry = Some(name.into());
        self
    }

    pub fn fallback(mut self, name: impl Into<String>) -> Self {
        self.fallback = Some(name.into());
        self
    }
}

/// Explicit registry of resilience components, owned by whoever wires the
/// runtime and passed around by reference.
///
/// `A` is the argument type handed to fallback functions and `T` the
/// result type of protected calls.
pub struct ResilienceCoordinator<A, T> {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    retries: DashMap<String, Arc<RetryHandler>>,
    fallbacks: DashMap<String, Arc<FallbackHandler<A, T>>>,
}

impl<A, T> Default for ResilienceCoordinator<A, T>
where
    T: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A, T> ResilienceCoordinator<A, T>
where
    T: Clone,
{
    pub fn new() -> Self {
        Self {
            breakers: DashMap::new(),
            retries: DashMap::new(),
            fallbacks: DashMap::new(),
        }
    }

    /// Register a circuit breaker, replacing any with the same name.
    pub fn create_circuit_breaker(
        &self,
        name: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        let name = name.into();
        let breaker = Arc::new(CircuitBreaker::new(name.clone(), config));
        info!(breaker = %name, "Circuit breaker registered");
        self.breakers.insert(name, breaker.clone());
        breaker
    }

    /// Register a retry handler, replacing any with the same name.
    pub fn create_retry_handler(
        &self,
        name: impl Into<String>,
        config: RetryConfig,
    ) -> Arc<RetryHandler> {
        self.register_retry_handler(RetryHandler::new(name, config))
    }

    /// Register a pre-built retry handler (for example one with an observer).
    pub fn register_retry_handler(&self, handler: RetryHandler) -> Arc<RetryHandler> {
        let handler = Arc::new(handler);
        info!(handler = %handler.name(), "Retry handler registered");
        self.retries
            .insert(handler.name().to_string(), handler.clone());
        handler
    }

    /// Register a fallback handler, replacing any with the same name.
    pub fn create_fallback_handler(
        &self,
        name: impl Into<String>,
        config: FallbackConfig<A, T>,
    ) -> Arc<FallbackHandler<A, T>> {
        let name = name.into();
        let handler = Arc::new(FallbackHandler::new(name.clone(), config));
        info!(fallback = %name, "Fallback handler registered");
        self.fallbacks.insert(name, handler.clone());
        handler
    }

    pub fn circuit_breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| entry.value().clone())
    }

    pub fn retry_handler(&self, name: &str) -> Option<Arc<RetryHandler>> {
        self.retries.get(name).map(|entry| entry.value().clone())
    }

    pub fn fallback_handler(&self, name: &str) -> Option<Arc<FallbackHandler<A, T>>> {
        self.fallbacks.get(name).map(|entry| entry.value().clone())
    }

    /// Run `op` through the layers named by `policy`.
    ///
    /// Layers nest with the fallback outermost, then the circuit breaker,
    /// then retry closest to the operation. The breaker therefore sees one
    /// outcome per top-level call, after retries are exhausted, and the
    /// fallback catches whatever the inner layers could not resolve
    /// (including an open circuit). `args` is only used by the fallback.
    ///
    /// Names that are not registered are logged and the layer is skipped.
    pub async fn resilient_call<E, F, Fut>(
        &self,
        policy: &CallPolicy,
        args: &A,
        mut op: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let breaker = self.lookup(&self.breakers, policy.circuit_breaker.as_deref(), "circuit breaker");
        let retry = self.lookup(&self.retries, policy.retry.as_deref(), "retry handler");
        let fallback = self.lookup(&self.fallbacks, policy.fallback.as_deref(), "fallback handler");

        let mut attempt = || op();
        let result = match (breaker, retry) {
            (Some(breaker), Some(retry)) => breaker.call(|| retry.run(attempt)).await,
            (Some(breaker), None) => breaker.call(attempt).await,
            (None, Some(retry)) => retry.run(attempt).await.map_err(ResilienceError::Operation),
            (None, None) => attempt().await.map_err(ResilienceError::Operation),
        };

        match (result, fallback) {
            (Ok(value), _) => Ok(value),
            (Err(e), Some(fallback)) => fallback.recover(args, e),
            (Err(e), None) => Err(e),
        }
    }

    /// Snapshot of every registered component.
    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            circuit_breakers: self
                .breakers
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().status()))
                .collect(),
            retry_handlers: self
                .retries
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().status()))
                .collect(),
            fallback_handlers: self
                .fallbacks
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().status()))
                .collect(),
        }
    }

    /// Degraded while any circuit is not closed.
    pub fn health(&self) -> ComponentHealth {
        let tripped: Vec<String> = self
            .breakers
            .iter()
            .filter(|entry| entry.value().state() != CircuitState::Closed)
            .map(|entry| entry.key().clone())
            .collect();

        if tripped.is_empty() {
            ComponentHealth::healthy("resilience")
        } else {
            ComponentHealth::with_status(
                "resilience",
                HealthStatus::Degraded,
                format!("circuits not closed: {}", tripped.join(", ")),
            )
        }
    }

    fn lookup<V: Clone>(
        &self,
        registry: &DashMap<String, V>,
        name: Option<&str>,
        kind: &str,
    ) -> Option<V> {
        let name = name?;
        let found = registry.get(name).map(|entry| entry.value().clone());
        if found.is_none() {
            warn!(name = name, kind = kind, "Unknown resilience component, layer skipped");
        }
        found
    }
}

/// Read-only snapshot of a coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub circuit_breakers: BTreeMap<String, CircuitBreakerStatus>,
    pub retry_handlers: BTreeMap<String, RetryStatus>,
    pub fallback_handlers: BTreeMap<String, FallbackStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffStrategy;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use vigil_types::FailureKind;

    #[derive(Debug)]
    struct Unavailable;

    impl std::fmt::Display for Unavailable {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "dependency unavailable")
        }
    }

    impl Classify for Unavailable {
        fn failure_kind(&self) -> FailureKind {
            FailureKind::Transient
        }
    }

    fn coordinator() -> ResilienceCoordinator<String, u32> {
        let coordinator = ResilienceCoordinator::new();
        coordinator.create_circuit_breaker(
            "provider",
            CircuitBreakerConfig {
                failure_threshold: 5,
                recovery_timeout: Duration::from_secs(60),
                expected: vec![FailureKind::Transient],
            },
        );
        coordinator.create_retry_handler(
            "provider",
            RetryConfig {
                max_attempts: 3,
                strategy: BackoffStrategy::Fixed {
                    delay: Duration::from_millis(10),
                },
                retryable: vec![FailureKind::Transient],
            },
        );
        coordinator
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_after_exhausted_retries() {
        let coordinator = coordinator();
        let policy = CallPolicy::new().circuit_breaker("provider").retry("provider");
        let calls = AtomicU32::new(0);

        for _ in 0..5 {
            let result = coordinator
                .resilient_call(&policy, &"args".to_string(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, _>(Unavailable)
                })
                .await;
            assert!(matches!(result, Err(ResilienceError::Operation(Unavailable))));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 15);

        let breaker = coordinator.circuit_breaker("provider").unwrap();
        assert_eq!(breaker.state(), CircuitState::Open);

        let result = coordinator
            .resilient_call(&policy, &"args".to_string(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(Unavailable)
            })
            .await;
        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_catches_open_circuit() {
        let coordinator = coordinator();
        coordinator.create_fallback_handler(
            "stale",
            FallbackConfig::function(|args: &String| Some(args.len() as u32)),
        );
        coordinator
            .circuit_breaker("provider")
            .unwrap()
            .force_state(CircuitState::Open);

        let policy = CallPolicy::new()
            .circuit_breaker("provider")
            .retry("provider")
            .fallback("stale");
        let result = coordinator
            .resilient_call(&policy, &"abcd".to_string(), || async { Ok::<u32, Unavailable>(1) })
            .await;

        assert_eq!(result.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_unknown_names_are_skipped() {
        let coordinator: ResilienceCoordinator<(), u32> = ResilienceCoordinator::new();
        let policy = CallPolicy::new().circuit_breaker("nope").retry("nope").fallback("nope");

        let result = coordinator
            .resilient_call(&policy, &(), || async { Ok::<u32, Unavailable>(9) })
            .await;
        assert_eq!(result.unwrap(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_and_health() {
        let coordinator = coordinator();
        coordinator.create_fallback_handler("static", FallbackConfig::value(0));

        let status = coordinator.status();
        assert_eq!(status.circuit_breakers["provider"].failure_threshold, 5);
        assert_eq!(status.retry_handlers["provider"].max_attempts, 3);
        assert!(status.fallback_handlers["static"].has_value);
        assert_eq!(coordinator.health().status, HealthStatus::Healthy);

        coordinator
            .circuit_breaker("provider")
            .unwrap()
            .force_state(CircuitState::Open);
        assert_eq!(coordinator.health().status, HealthStatus::Degraded);
    }
}

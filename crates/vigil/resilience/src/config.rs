//! Resilience configuration.
//!
//! Defines circuit breaker thresholds, retry budgets and backoff strategies.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use vigil_types::FailureKind;

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive counted failures that open the circuit.
    pub failure_threshold: u32,

    /// Time the circuit stays open before admitting a trial call.
    #[serde(with = "vigil_types::duration_serde")]
    pub recovery_timeout: Duration,

    /// Failure kinds that count toward the threshold. Others pass through.
    pub expected: Vec<FailureKind>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            expected: vec![FailureKind::Transient],
        }
    }
}

impl CircuitBreakerConfig {
    pub fn counts(&self, kind: FailureKind) -> bool {
        self.expected.contains(&kind)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of invocations, including the first one.
    pub max_attempts: u32,

    /// Delay schedule between attempts.
    pub strategy: BackoffStrategy,

    /// Failure kinds worth another attempt.
    pub retryable: Vec<FailureKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: BackoffStrategy::default(),
            retryable: vec![FailureKind::Transient],
        }
    }
}

impl RetryConfig {
    pub fn is_retryable(&self, kind: FailureKind) -> bool {
        self.retryable.contains(&kind)
    }
}

/// Backoff schedule between retry attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Fixed {
        #[serde(with = "vigil_types::duration_serde")]
        delay: Duration,
    },

    /// `base + increment * (attempt - 1)`.
    Linear {
        #[serde(with = "vigil_types::duration_serde")]
        base: Duration,
        #[serde(with = "vigil_types::duration_serde")]
        increment: Duration,
    },

    /// `min(base * 2^(attempt - 1), max_delay)` plus up to 10% random jitter.
    ExponentialJitter {
        #[serde(with = "vigil_types::duration_serde")]
        base: Duration,
        #[serde(with = "vigil_types::duration_serde")]
        max_delay: Duration,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::ExponentialJitter {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl BackoffStrategy {
    /// Delay to wait after failed attempt number `attempt` (1-based) out of
    /// `max_attempts`.
    pub fn delay(&self, attempt: u32, max_attempts: u32) -> Duration {
        let attempt = attempt.clamp(1, max_attempts.max(1));

        match self {
            BackoffStrategy::Fixed { delay } => *delay,
            BackoffStrategy::Linear { base, increment } => {
                base.saturating_add(increment.saturating_mul(attempt - 1))
            }
            BackoffStrategy::ExponentialJitter { base, max_delay } => {
                let exp = base.as_secs_f64() * 2f64.powi(attempt as i32 - 1);
                let capped = exp.min(max_delay.as_secs_f64());
                let jitter = if capped > 0.0 {
                    rand::thread_rng().gen_range(0.0..=capped * 0.1)
                } else {
                    0.0
                };
                Duration::try_from_secs_f64(capped + jitter).unwrap_or(*max_delay)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_defaults() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.recovery_timeout, Duration::from_secs(60));
        assert!(config.counts(FailureKind::Transient));
        assert!(!config.counts(FailureKind::Permanent));
    }

    #[test]
    fn test_fixed_delay() {
        let strategy = BackoffStrategy::Fixed {
            delay: Duration::from_millis(250),
        };
        assert_eq!(strategy.delay(1, 3), Duration::from_millis(250));
        assert_eq!(strategy.delay(3, 3), Duration::from_millis(250));
    }

    #[test]
    fn test_linear_delay() {
        let strategy = BackoffStrategy::Linear {
            base: Duration::from_millis(100),
            increment: Duration::from_millis(50),
        };
        assert_eq!(strategy.delay(1, 5), Duration::from_millis(100));
        assert_eq!(strategy.delay(2, 5), Duration::from_millis(150));
        assert_eq!(strategy.delay(4, 5), Duration::from_millis(250));
    }

    #[test]
    fn test_exponential_delay_bounds() {
        let strategy = BackoffStrategy::ExponentialJitter {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        };

        for _ in 0..50 {
            let first = strategy.delay(1, 10).as_secs_f64();
            assert!((1.0..=1.1).contains(&first), "first = {}", first);

            let third = strategy.delay(3, 10).as_secs_f64();
            assert!((4.0..=4.4).contains(&third), "third = {}", third);

            let capped = strategy.delay(9, 10).as_secs_f64();
            assert!((10.0..=11.0).contains(&capped), "capped = {}", capped);
        }
    }

    #[test]
    fn test_strategy_serde_shape() {
        let json = serde_json::to_value(BackoffStrategy::Fixed {
            delay: Duration::from_millis(5),
        })
        .unwrap();
        assert_eq!(json["type"], "fixed");
        assert_eq!(json["delay"], 5);
    }
}

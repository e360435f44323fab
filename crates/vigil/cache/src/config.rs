//! Cache configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a [`Cache`](crate::Cache).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries kept at any time.
    pub max_size: usize,

    /// TTL applied when `set` is called without one.
    #[serde(with = "vigil_types::duration_serde")]
    pub default_ttl: Duration,

    /// Hit rate (percent) below which the cache reports a warning.
    pub min_healthy_hit_rate: f64,

    /// Requests needed before the hit rate is considered meaningful.
    pub min_requests_for_health: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl: Duration::from_secs(3600),
            min_healthy_hit_rate: 50.0,
            min_requests_for_health: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.max_size, 1000);
        assert_eq!(config.default_ttl, Duration::from_secs(3600));
    }
}

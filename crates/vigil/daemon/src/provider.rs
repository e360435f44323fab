//! External data provider contract.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::CollectionTarget;
use crate::error::DependencyError;

/// One provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub provider_id: String,
    pub endpoint: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl FetchRequest {
    pub fn new(provider_id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Stable cache key: `provider:endpoint?k=v&k=v` with sorted params.
    pub fn cache_key(&self) -> String {
        let mut key = format!("{}:{}", self.provider_id, self.endpoint);
        if !self.params.is_empty() {
            let query: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            key.push('?');
            key.push_str(&query.join("&"));
        }
        key
    }
}

impl From<&CollectionTarget> for FetchRequest {
    fn from(target: &CollectionTarget) -> Self {
        Self {
            provider_id: target.provider_id.clone(),
            endpoint: target.endpoint.clone(),
            params: target.params.clone(),
        }
    }
}

impl fmt::Display for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Success,
    Error,
}

/// What a provider returns for a fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub status: ProviderStatus,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ProviderResponse {
    pub fn success(data: Value) -> Self {
        Self {
            status: ProviderStatus::Success,
            data,
            error_message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ProviderStatus::Error,
            data: Value::Null,
            error_message: Some(message.into()),
        }
    }

    /// An error status is a transient dependency failure.
    pub fn into_result(self, provider_id: &str) -> Result<Value, DependencyError> {
        match self.status {
            ProviderStatus::Success => Ok(self.data),
            ProviderStatus::Error => Err(DependencyError::transient(
                provider_id,
                self.error_message
                    .unwrap_or_else(|| "provider returned an error".to_string()),
            )),
        }
    }
}

/// A source of external data, called by the main cycle.
///
/// Implementations report failures through [`ProviderResponse::error`]
/// instead of panicking; the resilience layers take it from there.
#[async_trait]
pub trait DataProvider: Send + Sync {
    fn id(&self) -> &str;

    async fn fetch(&self, request: &FetchRequest) -> ProviderResponse;
}

/// Per-provider call accounting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderStats {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    /// Failed calls answered from the cache
    pub fallbacks: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vigil_types::Classify;

    #[test]
    fn test_cache_key() {
        let request = FetchRequest::new("weather", "/current");
        assert_eq!(request.cache_key(), "weather:/current");

        let request = request.with_param("units", "metric").with_param("city", "Porto");
        assert_eq!(request.cache_key(), "weather:/current?city=Porto&units=metric");
    }

    #[test]
    fn test_response_into_result() {
        let ok = ProviderResponse::success(json!({"temp_c": 18}));
        assert_eq!(ok.into_result("weather").unwrap()["temp_c"], 18);

        let err = ProviderResponse::error("503").into_result("weather").unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.message, "503");
    }

    #[test]
    fn test_response_wire_shape() {
        let response: ProviderResponse =
            serde_json::from_value(json!({"status": "error", "error_message": "rate limited"}))
                .unwrap();
        assert_eq!(response.status, ProviderStatus::Error);
        assert_eq!(response.data, Value::Null);
    }
}

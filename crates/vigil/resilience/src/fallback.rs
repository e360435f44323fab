//! Substitute results for failed calls.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Fallback function, given the original call's arguments.
///
/// Returning `None` means no substitute is available for these arguments.
pub type FallbackFn<A, T> = Arc<dyn Fn(&A) -> Option<T> + Send + Sync>;

/// What a fallback handler substitutes on failure.
pub struct FallbackConfig<A, T> {
    pub function: Option<FallbackFn<A, T>>,
    pub value: Option<T>,
}

impl<A, T> Default for FallbackConfig<A, T> {
    fn default() -> Self {
        Self {
            function: None,
            value: None,
        }
    }
}

impl<A, T> FallbackConfig<A, T> {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&A) -> Option<T> + Send + Sync + 'static,
    {
        Self {
            function: Some(Arc::new(f)),
            value: None,
        }
    }

    pub fn value(value: T) -> Self {
        Self {
            function: None,
            value: Some(value),
        }
    }

    /// Add a static value used when the function has no substitute.
    pub fn or_value(mut self, value: T) -> Self {
        self.value = Some(value);
        self
    }
}

/// Turns any failure into a substitute result when one is configured.
///
/// The function is consulted first; if it is absent or yields nothing the
/// static value is used. With neither, the original error propagates.
pub struct FallbackHandler<A, T> {
    name: String,
    config: FallbackConfig<A, T>,
}

impl<A, T: Clone> FallbackHandler<A, T> {
    pub fn new(name: impl Into<String>, config: FallbackConfig<A, T>) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace `error` with a substitute for `args`, if possible.
    pub fn recover<E: Display>(&self, args: &A, error: E) -> Result<T, E> {
        let substitute = self
            .config
            .function
            .as_ref()
            .and_then(|f| f(args))
            .or_else(|| self.config.value.clone());

        match substitute {
            Some(value) => {
                warn!(fallback = %self.name, error = %error, "Serving fallback result");
                Ok(value)
            }
            None => {
                debug!(fallback = %self.name, "No fallback available, propagating error");
                Err(error)
            }
        }
    }

    /// Run `op`, recovering from any failure.
    pub async fn call<E, F, Fut>(&self, args: &A, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        match op().await {
            Ok(value) => Ok(value),
            Err(e) => self.recover(args, e),
        }
    }

    pub fn status(&self) -> FallbackStatus {
        FallbackStatus {
            name: self.name.clone(),
            has_function: self.config.function.is_some(),
            has_value: self.config.value.is_some(),
        }
    }
}

/// Read-only view of a fallback handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackStatus {
    pub name: String,
    pub has_function: bool,
    pub has_value: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_function_receives_arguments() {
        let handler = FallbackHandler::new(
            "echo",
            FallbackConfig::function(|city: &String| Some(format!("cached:{}", city))),
        );

        let result = handler
            .call(&"lisbon".to_string(), || async { Err::<String, _>("offline") })
            .await;
        assert_eq!(result.unwrap(), "cached:lisbon");
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let handler = FallbackHandler::new("static", FallbackConfig::value(0u32));
        let result = handler.call(&(), || async { Ok::<_, String>(7u32) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn test_value_used_when_function_has_nothing() {
        let handler = FallbackHandler::new(
            "layered",
            FallbackConfig::function(|_: &()| None).or_value(42u32),
        );
        assert_eq!(handler.recover(&(), "boom").unwrap(), 42);
        assert!(handler.status().has_function);
        assert!(handler.status().has_value);
    }

    #[test]
    fn test_unconfigured_propagates() {
        let handler: FallbackHandler<(), u32> =
            FallbackHandler::new("empty", FallbackConfig::default());
        assert_eq!(handler.recover(&(), "boom").unwrap_err(), "boom");
    }
}

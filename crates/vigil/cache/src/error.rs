//! Error types for vigil-cache.
//!
//! A miss is a normal outcome (`Option::None`), never an error. These
//! errors only come from the durable snapshot tier.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("snapshot persistence failed: {0}")]
    Persistence(String),

    #[error("snapshot serialization failed: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

/// Result type for cache snapshot operations.
pub type CacheResult<T> = Result<T, CacheError>;

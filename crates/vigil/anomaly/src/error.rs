use thiserror::Error;

/// Errors from the anomaly subsystem.
///
/// None of these reach `detect_anomalies` callers: training failures fall
/// back to statistical detection and persistence failures force a retrain.
#[derive(Debug, Error)]
pub enum AnomalyError {
    #[error("insufficient data: need {needed} samples, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("model training failed: {0}")]
    Training(String),

    #[error("model artifact rejected: {0}")]
    InvalidArtifact(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl From<std::io::Error> for AnomalyError {
    fn from(e: std::io::Error) -> Self {
        AnomalyError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for AnomalyError {
    fn from(e: serde_json::Error) -> Self {
        AnomalyError::InvalidArtifact(e.to_string())
    }
}

/// Convenience type alias for anomaly results.
pub type AnomalyResult<T> = Result<T, AnomalyError>;

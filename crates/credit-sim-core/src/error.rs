use thiserror::Error;

#[derive(Debug, Error)]
pub enum CreditSimError {
    #[error("Invalid input: {field} — {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Invalid correlation input: {0}")]
    InvalidCorrelation(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Simulation cancelled after {completed_paths} completed paths")]
    Cancelled { completed_paths: usize },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for CreditSimError {
    fn from(e: serde_json::Error) -> Self {
        CreditSimError::SerializationError(e.to_string())
    }
}

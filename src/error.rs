use polars::error::PolarsError;

use crate::session::SessionId;

pub type Result<T> = std::result::Result<T, TutorError>;

#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    #[error("action {action} is out of range for {num_concepts} concepts")]
    InvalidAction { action: usize, num_concepts: usize },

    #[error("session {0} has not been initialised")]
    NotInitialized(SessionId),

    #[error("session {0} has mastered every concept; reset it before continuing")]
    EpisodeComplete(SessionId),

    #[error("not enough experience: requested {requested}, stored {available}")]
    InsufficientData { requested: usize, available: usize },

    #[error("malformed dataset record at row {row}: {reason}")]
    MalformedDatasetRecord { row: usize, reason: String },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("dataset error: {0}")]
    Dataset(#[from] PolarsError),

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TutorError {
    /// Conditions the training loop absorbs instead of surfacing to the driver.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TutorError::InsufficientData { .. } | TutorError::MalformedDatasetRecord { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_data_is_recoverable() {
        let err = TutorError::InsufficientData {
            requested: 16,
            available: 3,
        };
        assert!(err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "not enough experience: requested 16, stored 3"
        );
    }

    #[test]
    fn validation_errors_are_not_recoverable() {
        let err = TutorError::InvalidAction {
            action: 12,
            num_concepts: 10,
        };
        assert!(!err.is_recoverable());
        assert!(!TutorError::NotInitialized(SessionId::from("s-1")).is_recoverable());
    }
}

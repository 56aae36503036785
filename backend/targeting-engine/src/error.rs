use thiserror::Error;

/// Errors raised when a targeting value is constructed with data that breaks
/// its invariants, or when engine configuration cannot be loaded.
///
/// Evaluator failures during an evaluation never surface here: the
/// orchestrator turns them into non-matching outcomes instead.
#[derive(Debug, Error)]
pub enum TargetingError {
    #[error("Invalid criterion outcome: {0}")]
    InvalidOutcome(String),

    #[error("Invalid confidence sample: {0}")]
    InvalidConfidence(String),

    #[error("Invalid match result: {0}")]
    InvalidResult(String),

    #[error("Invalid property: {0}")]
    InvalidProperty(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid targeting config: {0}")]
    InvalidTargeting(String),

    #[error("Invalid engine config: {0}")]
    InvalidConfig(String),

    #[error("Failed to load engine config from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Batch of {size} candidates exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TargetingError>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent stream error: {0}")]
    Stream(String),

    #[error("Classifier error: {0}")]
    Classify(String),

    #[error("Classifier credentials missing")]
    NoCredentials,

    #[error("Prompt too long for the model context window")]
    PromptTooLong,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {key}")]
    NotFound { key: String },

    #[error("Request already active for session: {key}")]
    RequestActive { key: String },

    #[error("Sequence mismatch: expected {expected}, current {current}")]
    SequenceMismatch { expected: u64, current: u64 },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Renew protocol error: {0}")]
    Renew(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SessionError {
    /// Wire error code used by model-command failures.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NotFound { .. } => "CONTEXT_ERROR",
            SessionError::RequestActive { .. } => "CONTEXT_ERROR",
            SessionError::SequenceMismatch { .. } => "SEQUENCE_MISMATCH",
            SessionError::InvalidOperation(_) => "INVALID_OPERATION",
            SessionError::InvalidArgs(_) => "INVALID_ARGS",
            SessionError::Renew(_) => "CONTEXT_ERROR",
            SessionError::Serialization(_) => "INVALID_ARGS",
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

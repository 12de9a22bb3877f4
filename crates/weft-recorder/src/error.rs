use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Record not found: {id}")]
    NotFound { id: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt record file: {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RecorderError>;

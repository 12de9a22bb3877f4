use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid session key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, WeftError>;

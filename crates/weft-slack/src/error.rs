use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlackError {
    /// Slack replied with an error code (`ratelimited`, `already_reacted`, …).
    #[error("Slack API error: {code}")]
    Api { code: String },

    /// `ratelimited` with a Retry-After hint, surfaced by the transport.
    #[error("Slack rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Slack transport error: {0}")]
    Transport(String),

    #[error("Message not found: {channel}/{ts}")]
    MessageNotFound { channel: String, ts: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SlackError {
    /// Reaction mutations tolerate "already applied" / "not there" responses.
    pub fn is_benign_reaction_error(&self) -> bool {
        matches!(
            self,
            SlackError::Api { code } if code == "already_reacted" || code == "no_reaction"
        )
    }
}

pub type Result<T> = std::result::Result<T, SlackError>;

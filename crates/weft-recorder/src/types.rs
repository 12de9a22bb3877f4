use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One turn of a conversation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User {
        text: String,
        user: String,
        at: DateTime<Utc>,
    },
    Assistant {
        text: String,
        /// Lazily populated by the summarizer pass.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
        at: DateTime<Utc>,
    },
}

/// A persisted conversation: an ordered sequence of turns plus metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationRecord {
    pub fn new(
        id: String,
        channel: impl Into<String>,
        thread_ts: Option<String>,
        owner: impl Into<String>,
        title: Option<String>,
        workflow: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            channel: channel.into(),
            thread_ts,
            owner: owner.into(),
            title,
            workflow,
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

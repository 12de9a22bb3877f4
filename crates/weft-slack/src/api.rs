//! Abstract Slack client contract.
//!
//! The core never touches the wire: channel ids, user ids, and message
//! timestamps are opaque strings, and every capability the system consumes is
//! a method here. The production transport and the test doubles both
//! implement this trait.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Extra options for [`SlackApi::post_message`].
#[derive(Debug, Clone, Default)]
pub struct MessageOptions {
    /// Post under this thread root.
    pub thread_ts: Option<String>,
    /// Block Kit payload (replaces plain-text rendering when present).
    pub blocks: Option<Vec<Value>>,
    /// Legacy attachments payload.
    pub attachments: Option<Vec<Value>>,
}

impl MessageOptions {
    pub fn in_thread(thread_ts: impl Into<String>) -> Self {
        Self {
            thread_ts: Some(thread_ts.into()),
            ..Default::default()
        }
    }

    pub fn with_blocks(mut self, blocks: Vec<Value>) -> Self {
        self.blocks = Some(blocks);
        self
    }
}

/// Result of posting a message.
#[derive(Debug, Clone)]
pub struct PostedMessage {
    pub ts: String,
}

/// Identity returned by `auth.test`.
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub user_id: String,
    pub team_id: String,
}

/// The Slack operations the core consumes. Contract, not wire.
#[async_trait]
pub trait SlackApi: Send + Sync {
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        opts: &MessageOptions,
    ) -> Result<PostedMessage>;

    async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
        blocks: Option<Vec<Value>>,
    ) -> Result<()>;

    async fn post_ephemeral(
        &self,
        channel: &str,
        user: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<()>;

    async fn delete_message(&self, channel: &str, ts: &str) -> Result<()>;

    /// Succeeds when the reaction is already applied.
    async fn add_reaction(&self, channel: &str, ts: &str, emoji: &str) -> Result<()>;

    /// Succeeds when the reaction is already gone.
    async fn remove_reaction(&self, channel: &str, ts: &str, emoji: &str) -> Result<()>;

    async fn get_permalink(&self, channel: &str, ts: &str) -> Result<String>;

    async fn conversations_info(&self, channel: &str) -> Result<Value>;

    async fn users_info(&self, user: &str) -> Result<Value>;

    async fn auth_test(&self) -> Result<BotIdentity>;

    /// Open a modal view against an interaction trigger id.
    async fn open_view(&self, trigger_id: &str, view: Value) -> Result<()>;

    /// `assistant.threads.setStatus` — the composer status line.
    async fn set_thread_status(&self, channel: &str, thread_ts: &str, status: &str) -> Result<()>;

    /// `assistant.threads.setTitle`.
    async fn set_thread_title(&self, channel: &str, thread_ts: &str, title: &str) -> Result<()>;
}

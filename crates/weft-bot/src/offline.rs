//! Offline transports for local dry-runs.
//!
//! The production Slack transport and the LLM SDK bridge are linked by the
//! embedder behind [`SlackApi`] / [`AgentClient`]. When no tokens are
//! configured the bot still starts with these: Slack calls log to tracing
//! and the agent echoes the prompt, so the whole pipeline can be driven from
//! a terminal.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use weft_agent::client::{AgentClient, AgentRequest, ClassifyRequest};
use weft_agent::events::{AgentEvent, ContentItem, FlatUsage, TurnResult};
use weft_slack::api::{BotIdentity, MessageOptions, PostedMessage, SlackApi};
use weft_slack::error::Result as SlackResult;

use crate::app::InboundMessage;

/// Slack transport that logs every call and fabricates timestamps.
#[derive(Default)]
pub struct OfflineSlack {
    counter: AtomicU32,
}

impl OfflineSlack {
    fn next_ts(&self) -> String {
        format!("{}.000000", self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl SlackApi for OfflineSlack {
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        opts: &MessageOptions,
    ) -> SlackResult<PostedMessage> {
        info!(channel, thread = opts.thread_ts.as_deref().unwrap_or("-"), "[slack] {text}");
        Ok(PostedMessage { ts: self.next_ts() })
    }

    async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
        _blocks: Option<Vec<serde_json::Value>>,
    ) -> SlackResult<()> {
        info!(channel, ts, "[slack:update] {text}");
        Ok(())
    }

    async fn post_ephemeral(
        &self,
        channel: &str,
        user: &str,
        text: &str,
        _thread_ts: Option<&str>,
    ) -> SlackResult<()> {
        info!(channel, user, "[slack:ephemeral] {text}");
        Ok(())
    }

    async fn delete_message(&self, channel: &str, ts: &str) -> SlackResult<()> {
        info!(channel, ts, "[slack:delete]");
        Ok(())
    }

    async fn add_reaction(&self, channel: &str, ts: &str, emoji: &str) -> SlackResult<()> {
        info!(channel, ts, "[slack:react] :{emoji}:");
        Ok(())
    }

    async fn remove_reaction(&self, channel: &str, ts: &str, emoji: &str) -> SlackResult<()> {
        info!(channel, ts, "[slack:unreact] :{emoji}:");
        Ok(())
    }

    async fn get_permalink(&self, channel: &str, ts: &str) -> SlackResult<String> {
        Ok(format!("https://slack.invalid/{channel}/{ts}"))
    }

    async fn conversations_info(&self, _channel: &str) -> SlackResult<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn users_info(&self, _user: &str) -> SlackResult<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn auth_test(&self) -> SlackResult<BotIdentity> {
        Ok(BotIdentity {
            user_id: "U_OFFLINE".into(),
            team_id: "T_OFFLINE".into(),
        })
    }

    async fn open_view(&self, trigger_id: &str, _view: serde_json::Value) -> SlackResult<()> {
        info!(trigger_id, "[slack:view]");
        Ok(())
    }

    async fn set_thread_status(&self, _: &str, _: &str, status: &str) -> SlackResult<()> {
        info!("[slack:status] {status}");
        Ok(())
    }

    async fn set_thread_title(&self, _: &str, _: &str, title: &str) -> SlackResult<()> {
        info!("[slack:title] {title}");
        Ok(())
    }
}

/// Agent that echoes the prompt. Keeps the pipeline drivable without an SDK.
pub struct OfflineAgent;

#[async_trait]
impl AgentClient for OfflineAgent {
    fn stream_turn(
        &self,
        request: AgentRequest,
        _cancel: CancellationToken,
    ) -> BoxStream<'static, AgentEvent> {
        let session_id = request
            .session_id
            .unwrap_or_else(|| format!("offline-{}", uuid::Uuid::new_v4()));
        let events = vec![
            AgentEvent::Assistant {
                content: vec![ContentItem::Text {
                    text: format!("(offline) {}", request.prompt),
                }],
            },
            AgentEvent::Result(TurnResult {
                subtype: "success".into(),
                session_id: Some(session_id),
                usage: Some(FlatUsage {
                    input_tokens: request.prompt.len() as u64,
                    output_tokens: 16,
                    ..Default::default()
                }),
                ..Default::default()
            }),
        ];
        futures_util::stream::iter(events).boxed()
    }

    async fn classify(&self, _request: ClassifyRequest) -> weft_agent::error::Result<String> {
        Err(weft_agent::error::AgentError::NoCredentials)
    }

    fn has_classifier(&self) -> bool {
        false
    }
}

/// Read stdin lines as messages into the pipeline. Dev loop only.
pub async fn stdin_driver(tx: mpsc::Sender<InboundMessage>) {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let sent = tx
            .send(InboundMessage {
                user: "U_LOCAL".into(),
                channel: "C_LOCAL".into(),
                thread_ts: Some("0.000000".into()),
                text: line,
            })
            .await;
        if sent.is_err() {
            break;
        }
    }
}

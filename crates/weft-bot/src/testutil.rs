//! Shared test doubles for the bot crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use weft_agent::client::{AgentClient, AgentRequest, ClassifyRequest};
use weft_agent::events::AgentEvent;
use weft_slack::api::{BotIdentity, MessageOptions, PostedMessage, SlackApi};
use weft_slack::error::{Result as SlackResult, SlackError};

/// Records every Slack call; post failures can be toggled on.
#[derive(Default)]
pub struct FakeSlack {
    pub log: StdMutex<Vec<String>>,
    fail_posts: AtomicBool,
    counter: StdMutex<u32>,
}

impl FakeSlack {
    pub fn fail_posts(&self) {
        self.fail_posts.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn next_ts(&self) -> String {
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        format!("{}.000", *counter)
    }
}

#[async_trait]
impl SlackApi for FakeSlack {
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        opts: &MessageOptions,
    ) -> SlackResult<PostedMessage> {
        if self.fail_posts.load(Ordering::SeqCst) {
            return Err(SlackError::Transport("post disabled".into()));
        }
        let ts = self.next_ts();
        self.log.lock().unwrap().push(format!(
            "post:{channel}:{}:{text}",
            opts.thread_ts.as_deref().unwrap_or("-")
        ));
        Ok(PostedMessage { ts })
    }

    async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
        _blocks: Option<Vec<serde_json::Value>>,
    ) -> SlackResult<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("update:{channel}:{ts}:{text}"));
        Ok(())
    }

    async fn post_ephemeral(
        &self,
        channel: &str,
        user: &str,
        text: &str,
        _thread_ts: Option<&str>,
    ) -> SlackResult<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("ephemeral:{channel}:{user}:{text}"));
        Ok(())
    }

    async fn delete_message(&self, channel: &str, ts: &str) -> SlackResult<()> {
        self.log.lock().unwrap().push(format!("delete:{channel}:{ts}"));
        Ok(())
    }

    async fn add_reaction(&self, channel: &str, ts: &str, emoji: &str) -> SlackResult<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("react:{channel}:{ts}:{emoji}"));
        Ok(())
    }

    async fn remove_reaction(&self, channel: &str, ts: &str, emoji: &str) -> SlackResult<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("unreact:{channel}:{ts}:{emoji}"));
        Ok(())
    }

    async fn get_permalink(&self, channel: &str, ts: &str) -> SlackResult<String> {
        Ok(format!("https://slack.example/{channel}/{ts}"))
    }

    async fn conversations_info(&self, _channel: &str) -> SlackResult<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn users_info(&self, _user: &str) -> SlackResult<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn auth_test(&self) -> SlackResult<BotIdentity> {
        Ok(BotIdentity {
            user_id: "UBOT".into(),
            team_id: "T0".into(),
        })
    }

    async fn open_view(&self, trigger_id: &str, _view: serde_json::Value) -> SlackResult<()> {
        self.log.lock().unwrap().push(format!("view:{trigger_id}"));
        Ok(())
    }

    async fn set_thread_status(&self, _: &str, _: &str, status: &str) -> SlackResult<()> {
        self.log.lock().unwrap().push(format!("status:{status}"));
        Ok(())
    }

    async fn set_thread_title(&self, _: &str, _: &str, title: &str) -> SlackResult<()> {
        self.log.lock().unwrap().push(format!("title:{title}"));
        Ok(())
    }
}

/// Agent double that replays a scripted event sequence per turn, records the
/// requests it saw, and answers classifications with a fixed response.
pub struct ScriptedAgent {
    pub turns: StdMutex<Vec<Vec<AgentEvent>>>,
    pub requests: StdMutex<Vec<AgentRequest>>,
    pub classification: Option<String>,
}

impl ScriptedAgent {
    pub fn new(turns: Vec<Vec<AgentEvent>>, classification: Option<&str>) -> Self {
        Self {
            turns: StdMutex::new(turns),
            requests: StdMutex::new(Vec::new()),
            classification: classification.map(String::from),
        }
    }
}

#[async_trait]
impl AgentClient for ScriptedAgent {
    fn stream_turn(
        &self,
        request: AgentRequest,
        _cancel: CancellationToken,
    ) -> BoxStream<'static, AgentEvent> {
        self.requests.lock().unwrap().push(request);
        let mut turns = self.turns.lock().unwrap();
        let events = if turns.is_empty() {
            Vec::new()
        } else {
            turns.remove(0)
        };
        futures_util::stream::iter(events).boxed()
    }

    async fn classify(&self, _request: ClassifyRequest) -> weft_agent::error::Result<String> {
        self.classification
            .clone()
            .ok_or_else(|| weft_agent::error::AgentError::Classify("no classifier".into()))
    }

    fn has_classifier(&self) -> bool {
        self.classification.is_some()
    }
}

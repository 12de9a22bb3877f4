//! The per-turn [`StreamSinks`] implementation: fans processor callbacks out
//! to Slack messages, reactions, the session store, and the form coordinator.

use std::sync::Arc;

use async_trait::async_trait;

use weft_agent::choice::ChoiceDirective;
use weft_agent::directives::SessionLinksDirective;
use weft_agent::events::ToolResultItem;
use weft_agent::processor::StreamSinks;
use weft_agent::summary::format_tool_result;
use weft_agent::tools::ToolOutcome;
use weft_agent::tracker::ToolUseTracker;
use weft_core::types::SessionKey;
use weft_core::usage::TurnUsage;
use weft_dispatch::links::classify_url;
use weft_slack::api::MessageOptions;
use weft_slack::reactions::Status;

use crate::app::AppState;

pub struct TurnSinks {
    pub app: Arc<AppState>,
    pub key: SessionKey,
    pub tracker: Arc<ToolUseTracker>,
}

impl TurnSinks {
    fn session_key(&self) -> String {
        self.key.format()
    }

    async fn post_in_thread(&self, text: &str) {
        let opts = match self.key.root_ts() {
            Some(ts) => MessageOptions::in_thread(ts),
            None => MessageOptions::default(),
        };
        let _ = self.app.slack.post_message(&self.key.channel, text, &opts).await;
    }
}

#[async_trait]
impl StreamSinks for TurnSinks {
    async fn on_working(&self, tool_name: &str) {
        if let Some(root) = self.key.root_ts() {
            self.app
                .reactions
                .update(&self.session_key(), &self.key.channel, root, Status::Working)
                .await;
        }
        self.app.store.update(&self.key, |s| {
            s.panel.active_tool = Some(tool_name.to_string());
        });
    }

    async fn on_todo_update(&self, _todos: serde_json::Value) {
        self.app.store.update(&self.key, |s| {
            s.panel.active_tool = Some("TodoWrite".to_string());
        });
        crate::panel::update_panel(&self.app, &self.key).await;
    }

    async fn on_tool_summary(&self, line: String) {
        self.post_in_thread(&line).await;
    }

    async fn on_tool_result(
        &self,
        tool_use_id: String,
        tool_name: Option<String>,
        result: ToolResultItem,
    ) {
        // Clear any external call id mapped to this tool use.
        let _ = self.tracker.take_external(&tool_use_id);
        let line = format_tool_result(tool_name.as_deref(), &result.content, result.is_error);
        self.post_in_thread(&line).await;
    }

    async fn on_tool_call(&self, name: &str, input: serde_json::Value) -> ToolOutcome {
        crate::model_tool::execute(&self.app, &self.key, name, input).await
    }

    async fn on_text(&self, text: String) {
        self.post_in_thread(&text).await;
    }

    async fn on_channel_message(&self, text: String) {
        // Channel messages escape the thread on purpose.
        let _ = self
            .app
            .slack
            .post_message(&self.key.channel, &text, &MessageOptions::default())
            .await;
    }

    async fn on_session_links(&self, links: SessionLinksDirective) {
        for url in [links.issue, links.pr, links.doc].into_iter().flatten() {
            if let Some(link) = classify_url(&url) {
                self.app.store.set_link(&self.key, link);
            }
        }
        crate::panel::update_panel(&self.app, &self.key).await;
    }

    async fn on_choice(&self, directive: ChoiceDirective) -> bool {
        self.app
            .forms
            .present(
                directive,
                &self.session_key(),
                &self.key.channel,
                self.key.root_ts(),
            )
            .await
    }

    async fn on_usage(&self, usage: TurnUsage, context_window: Option<u64>) {
        self.app.store.update(&self.key, |s| {
            if let Some(window) = context_window {
                s.usage.context_window = window;
            }
            s.usage.apply_turn(&usage);
        });
        if let Some(session) = self.app.store.get(&self.key) {
            if let Some(root) = self.key.root_ts() {
                self.app
                    .context_emoji
                    .update(
                        &self.session_key(),
                        &self.key.channel,
                        root,
                        session.usage.remaining_percent(),
                    )
                    .await;
            }
        }
    }
}

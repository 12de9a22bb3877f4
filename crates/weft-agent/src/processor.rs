//! Streaming turn processor.
//!
//! Drives the agent event stream for one turn and fans text, tool activity,
//! directives, and usage out to the injected sinks. The processor owns the
//! fixed directive order (session-links → channel-message → user-choice) and
//! the "post text only when no choice is pending" rule. Model commands
//! arriving as unresolved `ToolCall` events are answered in-line through
//! `StreamSinks::on_tool_call` while the SDK turn waits.
//!
//! `collected_text` accumulates assistant text *before* directive stripping:
//! the renew controller scans it for the `save_result` fallback, which a
//! stripped transcript could never satisfy.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use weft_core::config::FORM_CHUNK_QUESTIONS;
use weft_core::usage::TurnUsage;

use crate::choice::{ChoiceDirective, ChoiceForm, ChoiceQuestion};
use crate::directives::{
    extract_channel_message, extract_session_links, extract_user_choice, SessionLinksDirective,
};
use crate::error::Result;
use crate::events::{AgentEvent, ContentItem, ToolResultItem};
use crate::summary::format_tool_use;
use crate::tools::ToolOutcome;
use crate::tracker::ToolUseTracker;

/// Callbacks through which the processor produces Slack side-effects.
///
/// One capability object per turn; no class hierarchy, just the seams.
#[async_trait]
pub trait StreamSinks: Send + Sync {
    /// The model started using a tool.
    async fn on_working(&self, tool_name: &str);
    /// `TodoWrite` input, forwarded verbatim.
    async fn on_todo_update(&self, todos: serde_json::Value);
    /// Human one-line tool summary.
    async fn on_tool_summary(&self, line: String);
    /// A tool result arrived for a previously seen tool-use id.
    async fn on_tool_result(&self, tool_use_id: String, tool_name: Option<String>, result: ToolResultItem);
    /// Resolve a model command arriving mid-stream. The returned outcome is
    /// delivered back to the SDK bridge as this call's tool result.
    async fn on_tool_call(&self, name: &str, input: serde_json::Value) -> ToolOutcome;
    /// Plain assistant text to post verbatim.
    async fn on_text(&self, text: String);
    /// A `channel_message` directive body.
    async fn on_channel_message(&self, text: String);
    /// A `session_links` directive.
    async fn on_session_links(&self, links: SessionLinksDirective);
    /// A user-choice directive. Return `false` when UI emission failed
    /// (size/validation) — the processor then posts a plain-text fallback.
    async fn on_choice(&self, directive: ChoiceDirective) -> bool;
    /// Aggregated usage for the turn, with the reported context window.
    async fn on_usage(&self, usage: TurnUsage, context_window: Option<u64>);
}

/// What one processed turn produced.
#[derive(Debug, Clone, Default)]
pub struct StreamOutcome {
    pub success: bool,
    pub message_count: usize,
    pub aborted: bool,
    /// All assistant text seen this turn, pre-directive-stripping.
    pub collected_text: String,
    pub usage: Option<TurnUsage>,
    pub context_window: Option<u64>,
    pub has_user_choice: bool,
    /// SDK-side session id reported by the terminal result.
    pub agent_session_id: Option<String>,
    /// The model refused the prompt for length — force the empty context bucket.
    pub prompt_too_long: bool,
}

/// Drive one turn's event stream to completion (or cancellation).
pub async fn run(
    mut events: BoxStream<'static, AgentEvent>,
    sinks: &dyn StreamSinks,
    tracker: &ToolUseTracker,
    cancel: &CancellationToken,
) -> Result<StreamOutcome> {
    let mut outcome = StreamOutcome::default();

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                outcome.aborted = true;
                debug!(messages = outcome.message_count, "stream aborted");
                return Ok(outcome);
            }
            event = events.next() => match event {
                Some(e) => e,
                None => break,
            },
        };

        outcome.message_count += 1;
        match event {
            AgentEvent::Assistant { content } => {
                handle_assistant(content, sinks, tracker, &mut outcome).await;
            }
            AgentEvent::ToolCall(request) => {
                sinks.on_working(&request.name).await;
                sinks
                    .on_tool_summary(format_tool_use(&request.name, &request.input))
                    .await;
                tracker.register(&request.id, &request.name);
                // The SDK turn is parked on this call; answer it in-line.
                let answer = sinks
                    .on_tool_call(&request.name, request.input.clone())
                    .await;
                request.fulfill(answer);
            }
            AgentEvent::User { results } => {
                for result in results {
                    let name = tracker.name_for(&result.tool_use_id);
                    sinks
                        .on_tool_result(result.tool_use_id.clone(), name, result)
                        .await;
                }
            }
            AgentEvent::Result(result) => {
                outcome.success = result.is_success();
                outcome.agent_session_id = result.session_id.clone();
                if result.is_error && looks_prompt_too_long(result.result.as_deref()) {
                    outcome.prompt_too_long = true;
                }

                if let Some(final_text) = result.result.as_deref() {
                    let trimmed = final_text.trim();
                    // Skip text the assistant already streamed this turn.
                    if result.is_success()
                        && !trimmed.is_empty()
                        && !outcome.collected_text.contains(trimmed)
                    {
                        outcome.collected_text.push_str(final_text);
                        outcome.collected_text.push('\n');
                        process_text(final_text, sinks, &mut outcome).await;
                    }
                }

                if let Some((usage, window)) = result.aggregate_usage() {
                    outcome.usage = Some(usage);
                    outcome.context_window = window;
                    sinks.on_usage(usage, window).await;
                }
                // Terminal event — nothing follows.
                break;
            }
        }
    }

    Ok(outcome)
}

async fn handle_assistant(
    content: Vec<ContentItem>,
    sinks: &dyn StreamSinks,
    tracker: &ToolUseTracker,
    outcome: &mut StreamOutcome,
) {
    let has_tool_use = content
        .iter()
        .any(|item| matches!(item, ContentItem::ToolUse { .. }));

    if has_tool_use {
        for item in content {
            let ContentItem::ToolUse { id, name, input } = item else {
                continue;
            };
            sinks.on_working(&name).await;
            if name == "TodoWrite" {
                sinks.on_todo_update(input.clone()).await;
            }
            sinks.on_tool_summary(format_tool_use(&name, &input)).await;
            tracker.register(&id, &name);
        }
        return;
    }

    let text: String = content
        .iter()
        .filter_map(|item| match item {
            ContentItem::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("");

    if text.is_empty() {
        return;
    }
    outcome.collected_text.push_str(&text);
    outcome.collected_text.push('\n');
    process_text(&text, sinks, outcome).await;
}

/// Apply the directive pipeline to one assistant text and emit the remainder.
async fn process_text(text: &str, sinks: &dyn StreamSinks, outcome: &mut StreamOutcome) {
    let mut remaining = text.to_string();

    if let Some((links, cleaned)) = extract_session_links(&remaining) {
        remaining = cleaned;
        if !links.is_empty() {
            sinks.on_session_links(links).await;
        }
    }

    if let Some((body, cleaned)) = extract_channel_message(&remaining) {
        remaining = cleaned;
        sinks.on_channel_message(body).await;
    }

    let choice = extract_user_choice(&remaining).map(|(directive, cleaned)| {
        remaining = cleaned;
        directive
    });

    // Remaining text posts verbatim only when no choice card follows — the
    // card renders its own question/context copy.
    if !remaining.trim().is_empty() && choice.is_none() {
        sinks.on_text(remaining.trim().to_string()).await;
    }

    if let Some(directive) = choice {
        outcome.has_user_choice = true;
        if !sinks.on_choice(directive.clone()).await {
            warn!("choice UI emission failed — posting plain-text fallback");
            sinks.on_text(fallback_enumeration(&directive)).await;
        }
    }
}

fn looks_prompt_too_long(message: Option<&str>) -> bool {
    message.is_some_and(|m| m.to_ascii_lowercase().contains("prompt is too long"))
}

/// Split a form's questions into chunks that each fit one Slack message.
///
/// Chunk labels are `(i/N)`; only chunk 1 invalidates older pending forms.
pub fn chunk_questions(form: &ChoiceForm) -> Vec<ChoiceForm> {
    if form.questions.len() <= FORM_CHUNK_QUESTIONS {
        return vec![form.clone()];
    }

    let total = form.questions.len().div_ceil(FORM_CHUNK_QUESTIONS);
    form.questions
        .chunks(FORM_CHUNK_QUESTIONS)
        .enumerate()
        .map(|(i, chunk)| {
            let base = form.title.clone().unwrap_or_else(|| "질문".to_string());
            ChoiceForm {
                title: Some(format!("{base} ({}/{total})", i + 1)),
                description: if i == 0 { form.description.clone() } else { None },
                questions: chunk.to_vec(),
            }
        })
        .collect()
}

/// Plain-text enumeration used when the interactive card cannot be posted.
pub fn fallback_enumeration(directive: &ChoiceDirective) -> String {
    let mut out =
        String::from("⚠️ 선택지 UI를 표시할 수 없습니다. 옵션 번호로 답해주세요.\n");
    let render = |out: &mut String, q: &ChoiceQuestion| {
        out.push_str(&format!("\n*{}*\n", q.question));
        for option in &q.choices {
            match &option.description {
                Some(desc) => out.push_str(&format!("  {}. {} — {}\n", option.id, option.label, desc)),
                None => out.push_str(&format!("  {}. {}\n", option.id, option.label)),
            }
        }
    };
    match directive {
        ChoiceDirective::Single(q) => render(&mut out, q),
        ChoiceDirective::Form(form) => {
            if let Some(title) = &form.title {
                out.push_str(&format!("\n*{title}*\n"));
            }
            for q in &form.questions {
                render(&mut out, q);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choice::ChoiceOption;
    use crate::events::TurnResult;
    use std::sync::Mutex;

    /// Sink that records every callback; `fail_choice` forces the fallback.
    #[derive(Default)]
    struct Recording {
        log: Mutex<Vec<String>>,
        fail_choice: bool,
    }

    #[async_trait]
    impl StreamSinks for Recording {
        async fn on_working(&self, tool_name: &str) {
            self.log.lock().unwrap().push(format!("working:{tool_name}"));
        }
        async fn on_todo_update(&self, _todos: serde_json::Value) {
            self.log.lock().unwrap().push("todo".into());
        }
        async fn on_tool_summary(&self, line: String) {
            self.log.lock().unwrap().push(format!("summary:{line}"));
        }
        async fn on_tool_result(
            &self,
            tool_use_id: String,
            tool_name: Option<String>,
            _result: ToolResultItem,
        ) {
            self.log
                .lock()
                .unwrap()
                .push(format!("result:{tool_use_id}:{}", tool_name.unwrap_or_default()));
        }
        async fn on_tool_call(&self, name: &str, _input: serde_json::Value) -> ToolOutcome {
            self.log.lock().unwrap().push(format!("tool_call:{name}"));
            ToolOutcome::ok(serde_json::json!({ "ok": true, "answered": name }))
        }
        async fn on_text(&self, text: String) {
            self.log.lock().unwrap().push(format!("text:{text}"));
        }
        async fn on_channel_message(&self, text: String) {
            self.log.lock().unwrap().push(format!("channel:{text}"));
        }
        async fn on_session_links(&self, links: SessionLinksDirective) {
            self.log
                .lock()
                .unwrap()
                .push(format!("links:{}", links.pr.unwrap_or_default()));
        }
        async fn on_choice(&self, directive: ChoiceDirective) -> bool {
            self.log
                .lock()
                .unwrap()
                .push(format!("choice:{}", directive.question_count()));
            !self.fail_choice
        }
        async fn on_usage(&self, usage: TurnUsage, _window: Option<u64>) {
            self.log
                .lock()
                .unwrap()
                .push(format!("usage:{}", usage.input_tokens));
        }
    }

    fn text_event(text: &str) -> AgentEvent {
        AgentEvent::Assistant {
            content: vec![ContentItem::Text {
                text: text.to_string(),
            }],
        }
    }

    fn result_event(subtype: &str, text: Option<&str>) -> AgentEvent {
        AgentEvent::Result(TurnResult {
            subtype: subtype.to_string(),
            result: text.map(String::from),
            session_id: Some("sdk-1".into()),
            ..Default::default()
        })
    }

    async fn drive(events: Vec<AgentEvent>, sinks: &Recording) -> StreamOutcome {
        let stream = futures_util::stream::iter(events).boxed();
        run(stream, sinks, &ToolUseTracker::new(), &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn plain_text_is_posted_verbatim() {
        let sinks = Recording::default();
        let outcome = drive(
            vec![text_event("hello there"), result_event("success", None)],
            &sinks,
        )
        .await;
        assert!(outcome.success);
        assert_eq!(sinks.log.lock().unwrap()[0], "text:hello there");
    }

    #[tokio::test]
    async fn directive_stripped_and_text_posted() {
        let sinks = Recording::default();
        let outcome = drive(
            vec![
                text_event(
                    "Done.\n{\"type\":\"session_links\",\"pr\":\"https://github.com/a/b/pull/7\"}",
                ),
                result_event("success", None),
            ],
            &sinks,
        )
        .await;
        let log = sinks.log.lock().unwrap().clone();
        assert_eq!(log[0], "links:https://github.com/a/b/pull/7");
        assert_eq!(log[1], "text:Done.");
        // collected_text keeps the pre-strip form.
        assert!(outcome.collected_text.contains("session_links"));
    }

    #[tokio::test]
    async fn tool_use_registers_and_summarizes() {
        let sinks = Recording::default();
        let tracker = ToolUseTracker::new();
        let events = vec![
            AgentEvent::Assistant {
                content: vec![ContentItem::ToolUse {
                    id: "tu_1".into(),
                    name: "Bash".into(),
                    input: serde_json::json!({"command": "ls"}),
                }],
            },
            AgentEvent::User {
                results: vec![ToolResultItem {
                    tool_use_id: "tu_1".into(),
                    content: "ok".into(),
                    is_error: false,
                }],
            },
            result_event("success", None),
        ];
        let stream = futures_util::stream::iter(events).boxed();
        run(stream, &sinks, &tracker, &CancellationToken::new())
            .await
            .unwrap();

        let log = sinks.log.lock().unwrap().clone();
        assert_eq!(log[0], "working:Bash");
        assert!(log[1].starts_with("summary:"));
        assert_eq!(log[2], "result:tu_1:Bash");
    }

    #[tokio::test]
    async fn tool_call_resolved_mid_stream() {
        let sinks = Recording::default();
        let tracker = ToolUseTracker::new();
        let (request, mut rx) = crate::events::ToolCallRequest::new(
            "tu_9",
            "GET_SESSION",
            serde_json::json!({}),
        );
        let events = vec![AgentEvent::ToolCall(request), result_event("success", None)];
        let stream = futures_util::stream::iter(events).boxed();
        run(stream, &sinks, &tracker, &CancellationToken::new())
            .await
            .unwrap();

        // The parked bridge got its answer and the UI callbacks fired.
        let outcome = rx.try_recv().expect("outcome delivered");
        assert!(!outcome.is_error);
        assert_eq!(outcome.content["answered"], "GET_SESSION");
        let log = sinks.log.lock().unwrap().clone();
        assert_eq!(log[0], "working:GET_SESSION");
        assert!(log[1].starts_with("summary:"));
        assert_eq!(log[2], "tool_call:GET_SESSION");
        assert_eq!(tracker.name_for("tu_9").as_deref(), Some("GET_SESSION"));
    }

    #[tokio::test]
    async fn choice_suppresses_plain_post_and_sets_flag() {
        let sinks = Recording::default();
        let outcome = drive(
            vec![
                text_event(
                    r#"{"type":"user_choice","question":"DB?","choices":[{"id":"1","label":"Postgres"}]}"#,
                ),
                result_event("success", None),
            ],
            &sinks,
        )
        .await;
        assert!(outcome.has_user_choice);
        let log = sinks.log.lock().unwrap().clone();
        assert_eq!(log, vec!["choice:1"]);
    }

    #[tokio::test]
    async fn failed_choice_ui_falls_back_to_text() {
        let sinks = Recording {
            fail_choice: true,
            ..Default::default()
        };
        drive(
            vec![
                text_event(
                    r#"{"type":"user_choice","question":"DB?","choices":[{"id":"1","label":"Postgres"}]}"#,
                ),
                result_event("success", None),
            ],
            &sinks,
        )
        .await;
        let log = sinks.log.lock().unwrap().clone();
        assert!(log[1].starts_with("text:⚠️"));
        assert!(log[1].contains("1. Postgres"));
    }

    #[tokio::test]
    async fn final_result_text_not_reposted_when_streamed() {
        let sinks = Recording::default();
        drive(
            vec![
                text_event("the answer"),
                result_event("success", Some("the answer")),
            ],
            &sinks,
        )
        .await;
        let log = sinks.log.lock().unwrap().clone();
        assert_eq!(log, vec!["text:the answer"]);
    }

    #[tokio::test]
    async fn fresh_final_result_text_is_processed() {
        let sinks = Recording::default();
        drive(
            vec![text_event("thinking…"), result_event("success", Some("final word"))],
            &sinks,
        )
        .await;
        let log = sinks.log.lock().unwrap().clone();
        assert_eq!(log, vec!["text:thinking…", "text:final word"]);
    }

    #[tokio::test]
    async fn cancellation_exits_cleanly() {
        let sinks = Recording::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        // A pending stream that never yields — cancellation must win.
        let stream = futures_util::stream::pending().boxed();
        let outcome = run(stream, &sinks, &ToolUseTracker::new(), &cancel)
            .await
            .unwrap();
        assert!(outcome.aborted);
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn usage_delivered_from_result() {
        let sinks = Recording::default();
        let mut result = TurnResult {
            subtype: "success".into(),
            ..Default::default()
        };
        result.usage = Some(crate::events::FlatUsage {
            input_tokens: 123,
            output_tokens: 4,
            ..Default::default()
        });
        let outcome = drive(vec![AgentEvent::Result(result)], &sinks).await;
        assert_eq!(outcome.usage.unwrap().input_tokens, 123);
        assert!(sinks.log.lock().unwrap().contains(&"usage:123".to_string()));
    }

    fn form_with(n: usize) -> ChoiceForm {
        ChoiceForm {
            title: Some("설정".into()),
            description: None,
            questions: (0..n)
                .map(|i| ChoiceQuestion {
                    id: format!("q{i}"),
                    question: format!("Q{i}?"),
                    choices: vec![ChoiceOption {
                        id: "1".into(),
                        label: "yes".into(),
                        description: None,
                    }],
                    context: None,
                })
                .collect(),
        }
    }

    #[test]
    fn chunking_splits_at_six() {
        assert_eq!(chunk_questions(&form_with(6)).len(), 1);

        let chunks = chunk_questions(&form_with(7));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].questions.len(), 6);
        assert_eq!(chunks[1].questions.len(), 1);
        assert_eq!(chunks[0].title.as_deref(), Some("설정 (1/2)"));
        assert_eq!(chunks[1].title.as_deref(), Some("설정 (2/2)"));

        assert_eq!(chunk_questions(&form_with(13)).len(), 3);
    }
}

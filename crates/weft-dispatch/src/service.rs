//! Workflow classification.
//!
//! One cheap classifier call (temperature 0, ≤256 tokens) decides which
//! workflow a user message opens. The response is parsed by balanced-brace
//! JSON extraction with a legacy XML-tag fallback. Classification never fails
//! the message path: every error yields `{default, heuristic title}`.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use weft_agent::client::{AgentClient, ClassifyRequest};
use weft_agent::scan::find_balanced_object;
use weft_core::types::{truncate_chars, Workflow};

use crate::links::{classify_url, extract_links, ExtractedLinks};

/// Hard cap on the classifier round trip.
const CLASSIFY_TIMEOUT_SECS: u64 = 10;
/// Titles are clamped to this many characters.
const MAX_TITLE_CHARS: usize = 60;
/// Heuristic title length when the classifier gives none.
const HEURISTIC_TITLE_CHARS: usize = 50;

/// Outcome of dispatching one user message.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub workflow: Workflow,
    pub title: String,
    pub links: ExtractedLinks,
}

pub struct DispatchService {
    client: Arc<dyn AgentClient>,
    model: String,
    /// Classification system prompt; `None` disables the classifier entirely.
    prompt: Option<String>,
    fallback_count: AtomicU64,
}

impl DispatchService {
    pub fn new(client: Arc<dyn AgentClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            prompt: Some(default_classifier_prompt()),
            fallback_count: AtomicU64::new(0),
        }
    }

    pub fn without_prompt(mut self) -> Self {
        self.prompt = None;
        self
    }

    /// How many classifications fell back to the default workflow.
    pub fn fallback_count(&self) -> u64 {
        self.fallback_count.load(Ordering::Relaxed)
    }

    /// Classify `message` into a workflow, title, and links.
    ///
    /// Text-extracted links are computed regardless of classifier outcome;
    /// classifier-provided links win per slot.
    pub async fn dispatch(
        &self,
        message: &str,
        cancel: Option<&CancellationToken>,
    ) -> DispatchResult {
        let text_links = extract_links(message);

        let Some(prompt) = &self.prompt else {
            return self.fallback(message, text_links, "classifier prompt missing");
        };
        if !self.client.has_classifier() {
            return self.fallback(message, text_links, "classifier credentials missing");
        }

        let request = ClassifyRequest {
            model: self.model.clone(),
            system: Some(prompt.clone()),
            prompt: message.to_string(),
            max_tokens: 256,
            temperature: 0.0,
        };

        if cancel.is_some_and(|token| token.is_cancelled()) {
            return self.fallback(message, text_links, "cancelled");
        }
        let call = tokio::time::timeout(
            Duration::from_secs(CLASSIFY_TIMEOUT_SECS),
            self.client.classify(request),
        );
        let response = match cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => {
                        return self.fallback(message, text_links, "cancelled");
                    }
                    r = call => r,
                }
            }
            None => call.await,
        };

        let raw = match response {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return self.fallback(message, text_links, &e.to_string()),
            Err(_) => return self.fallback(message, text_links, "classifier timeout"),
        };

        match parse_classifier_response(&raw) {
            Some(parsed) => {
                let workflow = match Workflow::from_str(&parsed.workflow) {
                    Ok(w) => w,
                    Err(_) => {
                        self.fallback_count.fetch_add(1, Ordering::Relaxed);
                        warn!(raw = %parsed.workflow, "unknown workflow from classifier");
                        Workflow::Default
                    }
                };
                let title = if parsed.title.is_empty() {
                    heuristic_title(message)
                } else {
                    truncate_chars(&sanitize_title(&parsed.title), MAX_TITLE_CHARS)
                };
                info!(workflow = %workflow, %title, "message classified");
                DispatchResult {
                    workflow,
                    title,
                    // Classifier links take precedence per slot.
                    links: parsed.links.or(text_links),
                }
            }
            None => self.fallback(message, text_links, "classifier response parse failure"),
        }
    }

    fn fallback(&self, message: &str, links: ExtractedLinks, reason: &str) -> DispatchResult {
        self.fallback_count.fetch_add(1, Ordering::Relaxed);
        debug!(reason, "dispatch fallback to default workflow");
        DispatchResult {
            workflow: Workflow::Default,
            title: heuristic_title(message),
            links,
        }
    }
}

struct ParsedClassification {
    workflow: String,
    title: String,
    links: ExtractedLinks,
}

/// Parse the classifier response: balanced-brace JSON first, then the legacy
/// `<workflow>…</workflow>` / `<title>…</title>` XML tags.
fn parse_classifier_response(raw: &str) -> Option<ParsedClassification> {
    let mut from = 0;
    while let Some((start, end)) = find_balanced_object(raw, from) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw[start..end]) {
            if let Some(workflow) = value["workflow"].as_str() {
                let mut links = ExtractedLinks::default();
                for key in ["issue", "pr", "doc"] {
                    if let Some(url) = value["links"][key].as_str() {
                        if let Some(link) = classify_url(url) {
                            links.set(link);
                        }
                    }
                }
                return Some(ParsedClassification {
                    workflow: workflow.to_string(),
                    title: value["title"].as_str().unwrap_or_default().to_string(),
                    links,
                });
            }
        }
        from = end;
    }

    // Legacy XML tags.
    let workflow = tag_content(raw, "workflow")?;
    Some(ParsedClassification {
        workflow,
        title: tag_content(raw, "title").unwrap_or_default(),
        links: ExtractedLinks::default(),
    })
}

fn tag_content(raw: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = raw.find(&open)? + open.len();
    let end = raw[start..].find(&close)? + start;
    Some(raw[start..end].trim().to_string())
}

/// Strip Slack mention/channel/link markup from a title.
///
/// `<@U…>` and `<#C…>` tokens are dropped; `<url|text>` keeps `text`;
/// bare `<url>` is dropped. Whitespace collapses afterwards.
pub fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut rest = title;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('>') else {
            out.push_str(&rest[open..]);
            rest = "";
            break;
        };
        let token = &after[..close];
        if !token.starts_with('@') && !token.starts_with('#') {
            if let Some((_, label)) = token.split_once('|') {
                out.push_str(label);
            } else if !token.starts_with("http") {
                out.push_str(token);
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn heuristic_title(message: &str) -> String {
    let sanitized = sanitize_title(message);
    let first_line = sanitized.lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        "새 세션".to_string()
    } else {
        truncate_chars(first_line, HEURISTIC_TITLE_CHARS)
    }
}

fn default_classifier_prompt() -> String {
    let workflows: Vec<&str> = Workflow::ALL.iter().map(|w| w.as_str()).collect();
    format!(
        "You route Slack messages to workflows. Reply with a single JSON object:\n\
         {{\"workflow\": \"<one of: {}>\", \"title\": \"<=60 char summary\", \
         \"links\": {{\"issue\": \"url?\", \"pr\": \"url?\", \"doc\": \"url?\"}}}}\n\
         Pick the workflow that best matches the user's intent. \
         Use \"default\" when unsure.",
        workflows.join(", ")
    )
}

//! Typed event taxonomy for the agent stream.
//!
//! One turn yields any number of `Assistant`, `ToolCall`, and `User` events
//! followed by exactly one terminal `Result` event carrying usage.
//!
//! Tools the SDK executes on its own side (shell, file edits, …) surface as
//! `Assistant` tool-use items with their results in later `User` events. The
//! session commands are different: only the host can answer them, so the
//! bridge emits an unresolved [`ToolCallRequest`] and parks the SDK turn on
//! its receiver until the host fulfills it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use weft_core::usage::TurnUsage;

use crate::tools::ToolOutcome;

/// One event from the agent SDK stream.
#[derive(Debug)]
pub enum AgentEvent {
    /// Assistant output: text and/or tool-use items.
    Assistant { content: Vec<ContentItem> },
    /// A model command awaiting the host's answer mid-stream.
    ToolCall(ToolCallRequest),
    /// Tool-result delivery for previously emitted tool-use ids.
    User { results: Vec<ToolResultItem> },
    /// Terminal event for the turn.
    Result(TurnResult),
}

/// A model command the SDK bridge cannot resolve itself.
///
/// The bridge holds the receiver half and feeds the delivered
/// [`ToolOutcome`] back into the SDK turn as this call's tool result.
#[derive(Debug)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub input: Value,
    respond: Option<oneshot::Sender<ToolOutcome>>,
}

impl ToolCallRequest {
    /// Build a request plus the receiver the bridge parks on.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        input: Value,
    ) -> (Self, oneshot::Receiver<ToolOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                id: id.into(),
                name: name.into(),
                input,
                respond: Some(tx),
            },
            rx,
        )
    }

    /// Deliver the outcome to the waiting bridge.
    ///
    /// A dropped receiver is tolerated: the turn was cancelled or the bridge
    /// already gave up on the call.
    pub fn fulfill(mut self, outcome: ToolOutcome) {
        if let Some(tx) = self.respond.take() {
            let _ = tx.send(outcome);
        }
    }
}

/// One item of an assistant event's content array.
#[derive(Debug, Clone)]
pub enum ContentItem {
    Text { text: String },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
}

/// A tool result addressed by tool-use id.
#[derive(Debug, Clone)]
pub struct ToolResultItem {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
}

/// The terminal result of a turn.
#[derive(Debug, Clone, Default)]
pub struct TurnResult {
    /// `success`, or an SDK-defined error subtype.
    pub subtype: String,
    /// Final assistant text, when the SDK delivers one.
    pub result: Option<String>,
    /// Flat usage fallback.
    pub usage: Option<FlatUsage>,
    /// Per-model usage map; preferred over `usage` when present.
    pub model_usage: Option<HashMap<String, ModelUsage>>,
    /// SDK-side session identifier (needed to resume the conversation).
    pub session_id: Option<String>,
    pub is_error: bool,
}

impl TurnResult {
    pub fn is_success(&self) -> bool {
        self.subtype == "success" && !self.is_error
    }

    /// Aggregate usage for the turn: the per-model map summed across models
    /// when present, else the flat object. Returns the usage plus the largest
    /// reported context window.
    pub fn aggregate_usage(&self) -> Option<(TurnUsage, Option<u64>)> {
        if let Some(per_model) = &self.model_usage {
            if !per_model.is_empty() {
                let mut total = TurnUsage::default();
                let mut window = None;
                for mu in per_model.values() {
                    total.add(&TurnUsage {
                        input_tokens: mu.input_tokens,
                        output_tokens: mu.output_tokens,
                        cache_read_tokens: mu.cache_read_input_tokens,
                        cache_create_tokens: mu.cache_creation_input_tokens,
                        cost_usd: mu.cost_usd,
                    });
                    if let Some(w) = mu.context_window {
                        window = Some(window.map_or(w, |prev: u64| prev.max(w)));
                    }
                }
                return Some((total, window));
            }
        }
        self.usage.as_ref().map(|flat| {
            (
                TurnUsage {
                    input_tokens: flat.input_tokens,
                    output_tokens: flat.output_tokens,
                    cache_read_tokens: flat.cache_read_input_tokens,
                    cache_create_tokens: flat.cache_creation_input_tokens,
                    cost_usd: 0.0,
                },
                None,
            )
        })
    }
}

/// Per-model usage entry (camelCase on the SDK wire).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default, rename = "costUSD")]
    pub cost_usd: f64,
    #[serde(default)]
    pub context_window: Option<u64>,
}

/// Flat usage object (snake_case on the SDK wire).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FlatUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

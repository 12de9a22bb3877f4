//! Abstract LLM SDK contract.
//!
//! The SDK exposes two capabilities the core consumes: a streaming agent turn
//! and a one-shot classification call against a cheap model. Both the
//! production SDK bridge and the test doubles implement [`AgentClient`].
//!
//! Tool handling splits in two. Tools the SDK runs itself surface as
//! `Assistant` tool-use items with their results in later `User` events.
//! The session commands declared in [`AgentRequest::tools`] can only be
//! answered by the host: the bridge emits an
//! [`crate::events::ToolCallRequest`] on the stream, parks the SDK turn on
//! its receiver, and feeds the delivered outcome back as the call's tool
//! result.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::events::AgentEvent;
use crate::tools::ToolDefinition;

/// One streaming agent turn.
#[derive(Debug, Clone, Default)]
pub struct AgentRequest {
    /// The user prompt for this turn.
    pub prompt: String,
    /// Workflow-specific system prompt, when one applies.
    pub system_prompt: Option<String>,
    pub model: String,
    /// SDK-side session id to resume; `None` starts a fresh SDK session.
    pub session_id: Option<String>,
    pub working_dir: Option<String>,
    /// Host-resolved model commands advertised for this turn. Invocations
    /// come back as `ToolCall` stream events awaiting an answer.
    pub tools: Vec<ToolDefinition>,
}

/// A one-shot, non-streaming call (classification, summaries).
#[derive(Debug, Clone)]
pub struct ClassifyRequest {
    pub model: String,
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ClassifyRequest {
    /// Deterministic low-cost defaults used by dispatch.
    pub fn deterministic(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            prompt: prompt.into(),
            max_tokens: 256,
            temperature: 0.0,
        }
    }
}

/// The LLM SDK operations the core consumes.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Start a streaming turn. The stream ends after the terminal
    /// [`AgentEvent::Result`]; raising `cancel` ends it early.
    fn stream_turn(
        &self,
        request: AgentRequest,
        cancel: CancellationToken,
    ) -> BoxStream<'static, AgentEvent>;

    /// One-shot completion returning raw model text.
    async fn classify(&self, request: ClassifyRequest) -> Result<String>;

    /// Whether classification credentials are configured.
    fn has_classifier(&self) -> bool {
        true
    }
}

//! Model-command tool wire types.
//!
//! [`ToolDefinition`]s are declared on the request so the SDK advertises the
//! session commands to the model; a call comes back as an unresolved
//! [`crate::events::ToolCallRequest`] and is answered with a [`ToolOutcome`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// API-level tool definition handed to the SDK.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Result of executing a model command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// JSON content returned to the model.
    pub content: Value,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(content: Value) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    /// Structured failure: `{ok:false, error:{code, message, details?}}`.
    pub fn error(code: &str, message: impl Into<String>, details: Option<Value>) -> Self {
        let mut error = serde_json::json!({
            "code": code,
            "message": message.into(),
        });
        if let Some(details) = details {
            error["details"] = details;
        }
        Self {
            content: serde_json::json!({ "ok": false, "error": error }),
            is_error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_outcome_shape() {
        let out = ToolOutcome::error("SEQUENCE_MISMATCH", "stale sequence", None);
        assert!(out.is_error);
        assert_eq!(out.content["ok"], false);
        assert_eq!(out.content["error"]["code"], "SEQUENCE_MISMATCH");
    }
}

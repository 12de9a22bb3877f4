//! Model-command tool: the system-to-model wire.
//!
//! Four commands, each with a JSON schema: `GET_SESSION`, `UPDATE_SESSION`
//! (optimistically locked), `ASK_USER_QUESTION`, and `SAVE_CONTEXT_RESULT`
//! (admissible only while a renew save is pending). Failures return
//! `{ok:false, error:{code, message}}` and never mutate state.
//!
//! Call path: the SDK bridge emits a command as an unresolved `ToolCall`
//! stream event; the processor answers it through
//! `TurnSinks::on_tool_call`, which lands in [`execute`] with the session
//! key of the turn it arrived on.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use weft_agent::directives::parse_choice_payload;
use weft_agent::tools::{ToolDefinition, ToolOutcome};
use weft_core::types::SessionKey;
use weft_dispatch::links::classify_url;
use weft_sessions::renew::parse_save_payload;
use weft_sessions::snapshot::{apply_operations, ResourceOp, ResourceSnapshot};

use crate::app::AppState;

pub const GET_SESSION: &str = "GET_SESSION";
pub const UPDATE_SESSION: &str = "UPDATE_SESSION";
pub const ASK_USER_QUESTION: &str = "ASK_USER_QUESTION";
pub const SAVE_CONTEXT_RESULT: &str = "SAVE_CONTEXT_RESULT";

/// API-level definitions for the four commands.
pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: GET_SESSION.into(),
            description: "현재 세션의 리소스 스냅샷(issues/prs/docs, active, sequence)을 조회한다."
                .into(),
            input_schema: json!({ "type": "object", "properties": {}, "additionalProperties": false }),
        },
        ToolDefinition {
            name: UPDATE_SESSION.into(),
            description: "세션 리소스를 수정한다. expectedSequence가 현재와 다르면 거부된다.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "expectedSequence": { "type": "integer" },
                    "operations": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "action": { "enum": ["add", "remove", "set_active"] },
                                "resourceType": { "enum": ["issue", "pr", "doc"] },
                                "link": { "type": "object" },
                                "url": { "type": "string" }
                            },
                            "required": ["action", "resourceType"]
                        }
                    }
                },
                "required": ["operations"]
            }),
        },
        ToolDefinition {
            name: ASK_USER_QUESTION.into(),
            description: "사용자에게 선택지를 제시한다. user_choice 또는 user_choices 형식.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "type": { "enum": ["user_choice", "user_choices"] },
                    "question": { "type": "string" },
                    "choices": { "type": "array" },
                    "title": { "type": "string" },
                    "description": { "type": "string" },
                    "questions": { "type": "array" },
                    "context": { "type": "string" }
                },
                "required": ["type"]
            }),
        },
        ToolDefinition {
            name: SAVE_CONTEXT_RESULT.into(),
            description: "renew 저장 단계의 결과를 보고한다. pending_save 상태에서만 허용된다.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "result": {
                        "type": "object",
                        "properties": {
                            "success": { "type": "boolean" },
                            "id": { "type": "string" },
                            "path": { "type": "string" },
                            "dir": { "type": "string" },
                            "summary": { "type": "string" },
                            "title": { "type": "string" },
                            "files": { "type": "array" },
                            "error": { "type": "string" }
                        }
                    }
                },
                "required": ["result"]
            }),
        },
    ]
}

/// Dispatch one model command for the session it arrived on.
pub async fn execute(
    app: &Arc<AppState>,
    key: &SessionKey,
    command: &str,
    input: Value,
) -> ToolOutcome {
    debug!(session = %key, command, "model command");
    match command {
        GET_SESSION => get_session(app, key),
        UPDATE_SESSION => update_session(app, key, input),
        ASK_USER_QUESTION => ask_user_question(app, key, input).await,
        SAVE_CONTEXT_RESULT => save_context_result(app, key, input),
        other => ToolOutcome::error("INVALID_COMMAND", format!("unknown command: {other}"), None),
    }
}

fn get_session(app: &Arc<AppState>, key: &SessionKey) -> ToolOutcome {
    match app.store.get(key) {
        Some(session) => {
            let snapshot = ResourceSnapshot::of(&session);
            ToolOutcome::ok(json!({ "ok": true, "session": snapshot }))
        }
        None => ToolOutcome::error("CONTEXT_ERROR", format!("no session for {key}"), None),
    }
}

fn update_session(app: &Arc<AppState>, key: &SessionKey, input: Value) -> ToolOutcome {
    let expected = input["expectedSequence"].as_u64();
    let Some(raw_ops) = input["operations"].as_array() else {
        return ToolOutcome::error("INVALID_ARGS", "operations array required", None);
    };

    // Wire shape uses resourceType; normalize to the snake_case field.
    let mut ops = Vec::with_capacity(raw_ops.len());
    for raw in raw_ops {
        let mut normalized = raw.clone();
        if let Some(rt) = raw.get("resourceType").cloned() {
            normalized["resource_type"] = rt;
        }
        match serde_json::from_value::<ResourceOp>(normalized) {
            Ok(op) => ops.push(op),
            Err(e) => {
                return ToolOutcome::error("INVALID_ARGS", format!("bad operation: {e}"), None)
            }
        }
    }

    match apply_operations(&app.store, key, expected, &ops, classify_url) {
        Ok(snapshot) => ToolOutcome::ok(json!({ "ok": true, "session": snapshot })),
        Err(e) => ToolOutcome::error(e.code(), e.to_string(), None),
    }
}

async fn ask_user_question(app: &Arc<AppState>, key: &SessionKey, input: Value) -> ToolOutcome {
    let Some(directive) = parse_choice_payload(&input) else {
        return ToolOutcome::error("INVALID_ARGS", "not a valid choice payload", None);
    };
    let presented = app
        .forms
        .present(directive, &key.format(), &key.channel, key.root_ts())
        .await;
    if presented {
        ToolOutcome::ok(json!({ "ok": true, "status": "question_posted" }))
    } else {
        ToolOutcome::error("CONTEXT_ERROR", "question UI could not be posted", None)
    }
}

fn save_context_result(app: &Arc<AppState>, key: &SessionKey, input: Value) -> ToolOutcome {
    let Some(save) = parse_save_payload(&input["result"]) else {
        return ToolOutcome::error("INVALID_ARGS", "result must carry a save id", None);
    };
    match app.renew.capture_save_result(key, save) {
        Ok(()) => ToolOutcome::ok(json!({ "ok": true })),
        Err(e) => ToolOutcome::error(e.code(), e.to_string(), None),
    }
}

//! Minimal Block Kit builders.
//!
//! Slack caps a message at 50 blocks; callers that compose large forms check
//! [`block_count`] before posting and fall back to plain text past the cap.

use serde_json::{json, Value};

use weft_core::config::MAX_BLOCKS_PER_MESSAGE;

pub fn header(text: &str) -> Value {
    json!({
        "type": "header",
        "text": { "type": "plain_text", "text": text, "emoji": true }
    })
}

pub fn section(mrkdwn: &str) -> Value {
    json!({
        "type": "section",
        "text": { "type": "mrkdwn", "text": mrkdwn }
    })
}

/// Section with short side-by-side fields (two columns in the Slack client).
pub fn section_fields(fields: &[String]) -> Value {
    let rendered: Vec<Value> = fields
        .iter()
        .map(|f| json!({ "type": "mrkdwn", "text": f }))
        .collect();
    json!({ "type": "section", "fields": rendered })
}

pub fn context(mrkdwn: &str) -> Value {
    json!({
        "type": "context",
        "elements": [{ "type": "mrkdwn", "text": mrkdwn }]
    })
}

pub fn divider() -> Value {
    json!({ "type": "divider" })
}

/// A button element for an `actions` block. `value` carries identity through
/// the interaction callback as a JSON string.
pub fn button(text: &str, action_id: &str, value: &str) -> Value {
    json!({
        "type": "button",
        "text": { "type": "plain_text", "text": text, "emoji": true },
        "action_id": action_id,
        "value": value
    })
}

pub fn button_styled(text: &str, action_id: &str, value: &str, style: &str) -> Value {
    json!({
        "type": "button",
        "text": { "type": "plain_text", "text": text, "emoji": true },
        "action_id": action_id,
        "value": value,
        "style": style
    })
}

pub fn actions(elements: Vec<Value>) -> Value {
    json!({ "type": "actions", "elements": elements })
}

pub fn block_count(blocks: &[Value]) -> usize {
    blocks.len()
}

pub fn fits_message(blocks: &[Value]) -> bool {
    blocks.len() <= MAX_BLOCKS_PER_MESSAGE
}

/// A plain-text input modal used for the "free text" escape on choice forms.
/// `private_metadata` threads the form/question identity back to the handler.
pub fn free_text_modal(title: &str, private_metadata: &str) -> Value {
    json!({
        "type": "modal",
        "callback_id": "free_text_answer",
        "private_metadata": private_metadata,
        "title": { "type": "plain_text", "text": title, "emoji": true },
        "submit": { "type": "plain_text", "text": "제출" },
        "close": { "type": "plain_text", "text": "취소" },
        "blocks": [{
            "type": "input",
            "block_id": "answer",
            "label": { "type": "plain_text", "text": "답변" },
            "element": {
                "type": "plain_text_input",
                "action_id": "answer_input",
                "multiline": true
            }
        }]
    })
}

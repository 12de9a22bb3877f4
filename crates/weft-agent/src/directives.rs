//! Embedded JSON directive parsers.
//!
//! Three independent parsers run over assistant text, each returning the
//! detected payload and the text with the directive removed. Extraction is
//! idempotent: running a parser over its own cleaned output finds nothing.
//! Malformed payloads are left in place and treated as prose.

use serde::Deserialize;
use serde_json::Value;

use crate::choice::{normalize_legacy_group, ChoiceDirective, ChoiceForm, ChoiceOption, ChoiceQuestion};
use crate::scan::extract_object;

/// Raw URLs from a `session_links` directive, one slot per link type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionLinksDirective {
    pub issue: Option<String>,
    pub pr: Option<String>,
    pub doc: Option<String>,
}

impl SessionLinksDirective {
    pub fn is_empty(&self) -> bool {
        self.issue.is_none() && self.pr.is_none() && self.doc.is_none()
    }
}

fn valid_http_url(value: &Value) -> Option<String> {
    let s = value.as_str()?.trim();
    if s.starts_with("http://") || s.starts_with("https://") {
        Some(s.to_string())
    } else {
        None
    }
}

/// Extract a `session_links` directive.
///
/// Known keys: `jira` (alias `issue`) → issue slot, `pr`, `doc`. Values must
/// be http(s) URLs; anything else is dropped from the payload.
pub fn extract_session_links(text: &str) -> Option<(SessionLinksDirective, String)> {
    let (value, cleaned) = extract_object(text, |v| v["type"] == "session_links")?;

    let directive = SessionLinksDirective {
        issue: valid_http_url(&value["jira"]).or_else(|| valid_http_url(&value["issue"])),
        pr: valid_http_url(&value["pr"]),
        doc: valid_http_url(&value["doc"]),
    };
    Some((directive, cleaned))
}

/// Extract a `channel_message` directive.
///
/// The body may arrive under `text`, `message`, or `content`; it must be
/// non-empty after trimming. A matching `type` with an empty body is not a
/// directive — the object stays in the text as prose.
pub fn extract_channel_message(text: &str) -> Option<(String, String)> {
    let body_of = |v: &Value| -> Option<String> {
        for key in ["text", "message", "content"] {
            if let Some(s) = v[key].as_str() {
                let trimmed = s.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
        None
    };

    let (value, cleaned) =
        extract_object(text, |v| v["type"] == "channel_message" && body_of(v).is_some())?;
    Some((body_of(&value)?, cleaned))
}

#[derive(Deserialize)]
struct SingleChoiceWire {
    question: String,
    choices: Vec<ChoiceOption>,
    #[serde(default)]
    context: Option<String>,
}

#[derive(Deserialize)]
struct FormQuestionWire {
    #[serde(default)]
    id: Option<String>,
    question: String,
    choices: Vec<ChoiceOption>,
    #[serde(default)]
    context: Option<String>,
}

#[derive(Deserialize)]
struct FormWire {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    questions: Vec<FormQuestionWire>,
}

#[derive(Deserialize)]
struct LegacyGroupWire {
    question: String,
    choices: Vec<FormQuestionWire>,
    #[serde(default)]
    context: Option<String>,
}

fn is_legacy_group(v: &Value) -> bool {
    v.get("type").is_none()
        && v.get("question").is_some()
        && v["choices"]
            .as_array()
            .is_some_and(|arr| !arr.is_empty() && arr.iter().all(|c| c.get("question").is_some()))
}

fn question_from_wire(index: usize, wire: FormQuestionWire) -> ChoiceQuestion {
    ChoiceQuestion {
        id: wire.id.unwrap_or_else(|| format!("q{}", index + 1)),
        question: wire.question,
        choices: wire.choices,
        context: wire.context,
    }
}

/// Extract a user-choice directive in any of its three admissible shapes:
/// `user_choice` (single question), `user_choices` (multi-question form), or
/// the legacy type-less group, normalized per [`normalize_legacy_group`].
pub fn extract_user_choice(text: &str) -> Option<(ChoiceDirective, String)> {
    let (value, cleaned) = extract_object(text, |v| {
        v["type"] == "user_choice" || v["type"] == "user_choices" || is_legacy_group(v)
    })?;

    let directive = parse_choice_payload(&value)?;
    Some((directive, cleaned))
}

/// Parse an already-extracted choice payload (any admissible shape).
///
/// Shared with the `ASK_USER_QUESTION` model command, whose input arrives as
/// a bare JSON object rather than embedded text.
pub fn parse_choice_payload(value: &Value) -> Option<ChoiceDirective> {
    match value["type"].as_str() {
        Some("user_choice") => {
            let wire: SingleChoiceWire = serde_json::from_value(value.clone()).ok()?;
            if wire.choices.is_empty() {
                return None;
            }
            Some(ChoiceDirective::Single(ChoiceQuestion {
                id: "q1".to_string(),
                question: wire.question,
                choices: wire.choices,
                context: wire.context,
            }))
        }
        Some("user_choices") => {
            let wire: FormWire = serde_json::from_value(value.clone()).ok()?;
            if wire.questions.is_empty() {
                return None;
            }
            let questions = wire
                .questions
                .into_iter()
                .enumerate()
                .map(|(i, q)| question_from_wire(i, q))
                .collect();
            Some(ChoiceDirective::Form(ChoiceForm {
                title: wire.title,
                description: wire.description,
                questions,
            }))
        }
        _ => {
            let wire: LegacyGroupWire = serde_json::from_value(value.clone()).ok()?;
            let items = wire
                .choices
                .into_iter()
                .enumerate()
                .map(|(i, q)| question_from_wire(i, q))
                .collect();
            normalize_legacy_group(wire.question, items, wire.context)
        }
    }
}

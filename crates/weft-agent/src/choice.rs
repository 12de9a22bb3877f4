//! User-choice payloads and legacy-shape normalization.

use serde::{Deserialize, Serialize};

/// One selectable option of a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A single question with its options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceQuestion {
    pub id: String,
    pub question: String,
    pub choices: Vec<ChoiceOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// A multi-question form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceForm {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub questions: Vec<ChoiceQuestion>,
}

/// The normalized result of any admissible user-choice shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChoiceDirective {
    Single(ChoiceQuestion),
    Form(ChoiceForm),
}

impl ChoiceDirective {
    pub fn question_count(&self) -> usize {
        match self {
            ChoiceDirective::Single(_) => 1,
            ChoiceDirective::Form(form) => form.questions.len(),
        }
    }
}

/// Normalize a legacy choice group: a type-less `{question, choices, context}`
/// whose `choices` are themselves question-shaped.
///
/// Exactly one inner choice collapses to a single `user_choice` (ids, labels,
/// descriptions preserved); several become a form titled with the outer
/// question.
pub fn normalize_legacy_group(
    outer_question: String,
    mut items: Vec<ChoiceQuestion>,
    context: Option<String>,
) -> Option<ChoiceDirective> {
    match items.len() {
        0 => None,
        1 => {
            let mut only = items.remove(0);
            if only.context.is_none() {
                only.context = context;
            }
            Some(ChoiceDirective::Single(only))
        }
        _ => Some(ChoiceDirective::Form(ChoiceForm {
            title: Some(outer_question),
            description: context,
            questions: items,
        })),
    }
}

//! Choice/form coordinator: bridges user-choice directives to Slack
//! interactive cards and back into the message pipeline.
//!
//! At most one form group is interactive per session. Creating a new group
//! invalidates the old one first, and all chunks of a group register inside a
//! single critical section so a click on chunk 1 can never race the
//! registration of chunks 2…N.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use weft_agent::choice::{ChoiceDirective, ChoiceQuestion};
use weft_agent::processor::chunk_questions;
use weft_slack::api::{MessageOptions, SlackApi};
use weft_slack::blocks;

use crate::app::InboundMessage;

/// Marker used as the choice id of a free-text answer.
const FREE_TEXT_ID: &str = "(직접입력)";
/// Option buttons shown on a single-choice card before the free-text escape.
const MAX_SINGLE_BUTTONS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormKind {
    Single,
    Multi,
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub choice_id: String,
    pub label: String,
    pub free_text: bool,
}

#[derive(Debug, Clone)]
struct PendingForm {
    form_id: String,
    kind: FormKind,
    session_key: String,
    channel: String,
    thread_ts: Option<String>,
    message_ts: String,
    title: Option<String>,
    questions: Vec<ChoiceQuestion>,
    selections: HashMap<String, Selection>,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct FormsState {
    by_id: HashMap<String, PendingForm>,
    by_session: HashMap<String, Vec<String>>,
}

pub struct ChoiceCoordinator {
    slack: Arc<dyn SlackApi>,
    reentry: mpsc::Sender<InboundMessage>,
    /// Sync mutex with short critical sections; never held across an await.
    state: StdMutex<FormsState>,
}

impl ChoiceCoordinator {
    pub fn new(slack: Arc<dyn SlackApi>, reentry: mpsc::Sender<InboundMessage>) -> Self {
        Self {
            slack,
            reentry,
            state: StdMutex::new(FormsState::default()),
        }
    }

    /// Number of forms still awaiting answers for a session.
    pub fn pending_count(&self, session_key: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .by_session
            .get(session_key)
            .map(|ids| ids.len())
            .unwrap_or(0)
    }

    /// Close every pending form for a session (e.g. on terminate/reset).
    pub async fn invalidate_session(&self, session_key: &str) {
        let stale = {
            let mut state = self.state.lock().unwrap();
            remove_session_forms(&mut state, session_key)
        };
        self.strike_messages(&stale).await;
    }

    /// Render a choice directive as interactive cards.
    ///
    /// Returns `false` when emission failed entirely — the caller posts the
    /// plain-text fallback instead.
    pub async fn present(
        &self,
        directive: ChoiceDirective,
        session_key: &str,
        channel: &str,
        thread_ts: Option<&str>,
    ) -> bool {
        let (kind, chunks): (FormKind, Vec<(Option<String>, Vec<ChoiceQuestion>)>) =
            match directive {
                ChoiceDirective::Single(question) => {
                    (FormKind::Single, vec![(None, vec![question])])
                }
                ChoiceDirective::Form(form) => {
                    let chunked = chunk_questions(&form);
                    (
                        FormKind::Multi,
                        chunked
                            .into_iter()
                            .map(|c| (c.title.clone(), c.questions))
                            .collect(),
                    )
                }
            };

        // One critical section: invalidate the old group (chunk-1 semantics)
        // and register every chunk of the new group before any card posts.
        let (stale, new_ids) = {
            let mut state = self.state.lock().unwrap();
            let stale = remove_session_forms(&mut state, session_key);
            let mut ids = Vec::with_capacity(chunks.len());
            for (title, questions) in &chunks {
                let form_id = Uuid::new_v4().to_string();
                state.by_id.insert(
                    form_id.clone(),
                    PendingForm {
                        form_id: form_id.clone(),
                        kind,
                        session_key: session_key.to_string(),
                        channel: channel.to_string(),
                        thread_ts: thread_ts.map(String::from),
                        message_ts: String::new(),
                        title: title.clone(),
                        questions: questions.clone(),
                        selections: HashMap::new(),
                        created_at: Utc::now(),
                    },
                );
                ids.push(form_id);
            }
            state
                .by_session
                .insert(session_key.to_string(), ids.clone());
            (stale, ids)
        };
        self.strike_messages(&stale).await;

        let mut posted_any = false;
        for (form_id, (title, questions)) in new_ids.iter().zip(&chunks) {
            let rendered = {
                let state = self.state.lock().unwrap();
                state
                    .by_id
                    .get(form_id)
                    .map(|form| render_form(form, title.as_deref(), questions))
            };
            let Some(card) = rendered else { continue };
            if !blocks::fits_message(&card) {
                warn!(form = %form_id, blocks = card.len(), "form exceeds block cap");
                continue;
            }

            let opts = match thread_ts {
                Some(ts) => MessageOptions::in_thread(ts).with_blocks(card),
                None => MessageOptions::default().with_blocks(card),
            };
            match self.slack.post_message(channel, "선택해주세요", &opts).await {
                Ok(posted) => {
                    posted_any = true;
                    let mut state = self.state.lock().unwrap();
                    if let Some(form) = state.by_id.get_mut(form_id) {
                        form.message_ts = posted.ts;
                    }
                }
                Err(e) => {
                    warn!(form = %form_id, error = %e, "form card post failed");
                }
            }
        }

        if !posted_any {
            // Emission failed — drop the registrations and let the caller
            // fall back to plain text.
            let mut state = self.state.lock().unwrap();
            remove_session_forms(&mut state, session_key);
        }
        posted_any
    }

    /// A choice button was clicked.
    pub async fn handle_selection(
        &self,
        user: &str,
        form_id: &str,
        question_id: &str,
        choice_id: &str,
    ) {
        let Some((question, label)) = self.lookup_option(form_id, question_id, choice_id) else {
            debug!(form = form_id, "selection on unknown/expired form");
            return;
        };
        self.apply_selection(
            user,
            form_id,
            question_id,
            Selection {
                choice_id: choice_id.to_string(),
                label,
                free_text: false,
            },
            question,
        )
        .await;
    }

    /// A free-text modal was submitted for a question.
    pub async fn handle_free_text(&self, user: &str, form_id: &str, question_id: &str, text: &str) {
        let question = {
            let state = self.state.lock().unwrap();
            let Some(form) = state.by_id.get(form_id) else {
                return;
            };
            let Some(q) = form.questions.iter().find(|q| q.id == question_id) else {
                return;
            };
            q.question.clone()
        };
        self.apply_selection(
            user,
            form_id,
            question_id,
            Selection {
                choice_id: FREE_TEXT_ID.to_string(),
                label: text.trim().to_string(),
                free_text: true,
            },
            question,
        )
        .await;
    }

    /// Open the free-text modal for a question.
    pub async fn open_free_text_modal(&self, trigger_id: &str, form_id: &str, question_id: &str) {
        let title = {
            let state = self.state.lock().unwrap();
            state
                .by_id
                .get(form_id)
                .and_then(|f| f.questions.iter().find(|q| q.id == question_id))
                .map(|q| q.question.clone())
        };
        let Some(title) = title else { return };
        let metadata = json!({ "f": form_id, "q": question_id }).to_string();
        let view = blocks::free_text_modal(&weft_core::types::truncate_chars(&title, 24), &metadata);
        if let Err(e) = self.slack.open_view(trigger_id, view).await {
            warn!(form = form_id, error = %e, "free text modal open failed");
        }
    }

    // --- internals ---------------------------------------------------------

    fn lookup_option(
        &self,
        form_id: &str,
        question_id: &str,
        choice_id: &str,
    ) -> Option<(String, String)> {
        let state = self.state.lock().unwrap();
        let form = state.by_id.get(form_id)?;
        let question = form.questions.iter().find(|q| q.id == question_id)?;
        let option = question.choices.iter().find(|c| c.id == choice_id)?;
        Some((question.question.clone(), option.label.clone()))
    }

    async fn apply_selection(
        &self,
        user: &str,
        form_id: &str,
        question_id: &str,
        selection: Selection,
        question_text: String,
    ) {
        // Mutate under the lock, then do Slack I/O from the snapshot.
        let completed = {
            let mut state = self.state.lock().unwrap();
            let Some(form) = state.by_id.get_mut(form_id) else {
                return;
            };
            form.selections
                .insert(question_id.to_string(), selection.clone());
            let complete = form.selections.len() == form.questions.len();
            let snapshot = form.clone();
            if complete {
                let session_key = form.session_key.clone();
                state.by_id.remove(form_id);
                if let Some(ids) = state.by_session.get_mut(&session_key) {
                    ids.retain(|id| id != form_id);
                    if ids.is_empty() {
                        state.by_session.remove(&session_key);
                    }
                }
            }
            (complete, snapshot)
        };
        let (complete, form) = completed;

        if !complete {
            // Re-render the card with updated progress.
            let card = render_form(&form, form.title.as_deref(), &form.questions);
            let _ = self
                .slack
                .update_message(&form.channel, &form.message_ts, "선택해주세요", Some(card))
                .await;
            return;
        }

        let answer = match form.kind {
            FormKind::Single => {
                let receipt = format!("✅ {question_text} / {}", selection.label);
                let _ = self
                    .slack
                    .update_message(&form.channel, &form.message_ts, &receipt, None)
                    .await;
                selection.label.clone()
            }
            FormKind::Multi => {
                let summary = composite_answer(&form);
                let card = vec![
                    blocks::section("✅ *답변이 모두 선택되었습니다*"),
                    blocks::context(&summary.replace('\n', " · ")),
                ];
                let _ = self
                    .slack
                    .update_message(&form.channel, &form.message_ts, "답변 완료", Some(card))
                    .await;
                summary
            }
        };

        let sent = self
            .reentry
            .send(InboundMessage {
                user: user.to_string(),
                channel: form.channel.clone(),
                thread_ts: form.thread_ts.clone(),
                text: answer,
            })
            .await;
        if sent.is_err() {
            warn!(form = %form_id, "re-entry channel closed — answer dropped");
        }
    }

    async fn strike_messages(&self, stale: &[PendingForm]) {
        for form in stale {
            if form.message_ts.is_empty() {
                continue;
            }
            let _ = self
                .slack
                .update_message(
                    &form.channel,
                    &form.message_ts,
                    "이 양식은 새 질문으로 대체되었습니다.",
                    None,
                )
                .await;
        }
    }
}

fn remove_session_forms(state: &mut FormsState, session_key: &str) -> Vec<PendingForm> {
    let ids = state.by_session.remove(session_key).unwrap_or_default();
    ids.iter()
        .filter_map(|id| state.by_id.remove(id))
        .collect()
}

/// The newline-joined composite fed back to the model:
/// `Q: id. label` per question, `(직접입력)` lines for free text.
fn composite_answer(form: &PendingForm) -> String {
    form.questions
        .iter()
        .filter_map(|q| {
            let s = form.selections.get(&q.id)?;
            Some(if s.free_text {
                format!("{}: {} {}", q.question, FREE_TEXT_ID, s.label)
            } else {
                format!("{}: {}. {}", q.question, s.choice_id, s.label)
            })
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render a form (or single-choice card) as Block Kit blocks.
fn render_form(
    form: &PendingForm,
    title: Option<&str>,
    questions: &[ChoiceQuestion],
) -> Vec<serde_json::Value> {
    let mut out = Vec::new();

    if form.kind == FormKind::Multi {
        if let Some(title) = title.or(form.title.as_deref()) {
            out.push(blocks::header(title));
        }
        let progress: String = questions
            .iter()
            .map(|q| {
                if form.selections.contains_key(&q.id) {
                    '●'
                } else {
                    '○'
                }
            })
            .collect();
        out.push(blocks::context(&format!(
            "{progress} {}/{}",
            form.selections.len(),
            questions.len()
        )));
    }

    for question in questions {
        let selected = form.selections.get(&question.id);
        let mut text = format!("*{}*", question.question);
        if let Some(context) = &question.context {
            text.push_str(&format!("\n_{context}_"));
        }
        if let Some(s) = selected {
            text.push_str(&format!("\n✅ {}", s.label));
        }
        out.push(blocks::section(&text));

        if selected.is_none() {
            let mut buttons: Vec<serde_json::Value> = question
                .choices
                .iter()
                .take(MAX_SINGLE_BUTTONS)
                .map(|option| {
                    let value = json!({
                        "f": form.form_id,
                        "q": question.id,
                        "c": option.id,
                    })
                    .to_string();
                    blocks::button(&option.label, "choice_select", &value)
                })
                .collect();
            let free_value = json!({ "f": form.form_id, "q": question.id }).to_string();
            buttons.push(blocks::button("직접 입력", "choice_free_text", &free_value));
            out.push(blocks::actions(buttons));
        }
    }
    out
}

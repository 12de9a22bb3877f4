//! Interactive callback handling: choice buttons, free-text modals, the
//! idle check-in card, and close confirmation.
//!
//! Every button carries a JSON `value` that threads identity (form id,
//! question id, session key) back through the callback.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use weft_core::types::SessionKey;

use crate::app::AppState;
use crate::commands::session::terminate_session;

/// One block-action callback, already unwrapped from the Slack envelope.
#[derive(Debug, Clone)]
pub struct BlockAction {
    pub action_id: String,
    /// The button's JSON `value` payload.
    pub value: String,
    pub user: String,
    pub channel: String,
    /// ts of the message the button lives on.
    pub message_ts: Option<String>,
    pub trigger_id: Option<String>,
}

/// A modal submission, already unwrapped.
#[derive(Debug, Clone)]
pub struct ViewSubmission {
    pub callback_id: String,
    pub private_metadata: String,
    pub user: String,
    /// The single text input of the free-text modal.
    pub text: String,
}

pub async fn handle_block_action(app: &Arc<AppState>, action: BlockAction) {
    let value: Value = serde_json::from_str(&action.value).unwrap_or(Value::Null);

    match action.action_id.as_str() {
        "choice_select" => {
            let (Some(form), Some(question), Some(choice)) = (
                value["f"].as_str(),
                value["q"].as_str(),
                value["c"].as_str(),
            ) else {
                debug!(value = %action.value, "malformed choice_select payload");
                return;
            };
            app.forms
                .handle_selection(&action.user, form, question, choice)
                .await;
        }
        "choice_free_text" => {
            let (Some(form), Some(question)) = (value["f"].as_str(), value["q"].as_str()) else {
                return;
            };
            let Some(trigger_id) = &action.trigger_id else {
                return;
            };
            app.forms
                .open_free_text_modal(trigger_id, form, question)
                .await;
        }
        "session_keep" => {
            let Some(key) = session_from(&value) else { return };
            app.store.update(&key, |s| {
                s.touch();
                s.sweep = Default::default();
            });
            if let Some(root) = key.root_ts() {
                let _ = app.slack.remove_reaction(&key.channel, root, "hourglass").await;
            }
            if let Some(ts) = &action.message_ts {
                let _ = app
                    .slack
                    .update_message(&action.channel, ts, "계속 진행합니다. 👍", None)
                    .await;
            }
        }
        "session_close" | "close_confirm" => {
            let Some(key) = session_from(&value) else { return };
            let Some(session) = app.store.get(&key) else {
                return;
            };
            if session.owner != action.user {
                let _ = app
                    .slack
                    .post_ephemeral(
                        &action.channel,
                        &action.user,
                        "세션 소유자만 종료할 수 있습니다.",
                        key.root_ts(),
                    )
                    .await;
                return;
            }
            terminate_session(app, &key).await;
            if let Some(ts) = &action.message_ts {
                let _ = app
                    .slack
                    .update_message(&action.channel, ts, "세션을 종료했습니다.", None)
                    .await;
            }
        }
        "close_cancel" => {
            if let Some(ts) = &action.message_ts {
                let _ = app
                    .slack
                    .update_message(&action.channel, ts, "종료를 취소했습니다.", None)
                    .await;
            }
        }
        other => warn!(action_id = other, "unhandled block action"),
    }
}

pub async fn handle_view_submission(app: &Arc<AppState>, submission: ViewSubmission) {
    if submission.callback_id != "free_text_answer" {
        warn!(callback_id = %submission.callback_id, "unhandled view submission");
        return;
    }
    let metadata: Value =
        serde_json::from_str(&submission.private_metadata).unwrap_or(Value::Null);
    let (Some(form), Some(question)) = (metadata["f"].as_str(), metadata["q"].as_str()) else {
        return;
    };
    app.forms
        .handle_free_text(&submission.user, form, question, &submission.text)
        .await;
}

fn session_from(value: &Value) -> Option<SessionKey> {
    SessionKey::parse(value["session"].as_str()?).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeSlack, ScriptedAgent};
    use serde_json::json;
    use tokio::sync::mpsc;
    use weft_core::config::WeftConfig;
    use weft_recorder::Recorder;

    async fn app() -> (Arc<AppState>, SessionKey, tempfile::TempDir, Arc<FakeSlack>) {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let slack = Arc::new(FakeSlack::default());
        let app = AppState::new(
            WeftConfig::default(),
            slack.clone(),
            Arc::new(ScriptedAgent::new(vec![], None)),
            Recorder::new(dir.path()).unwrap(),
            tx,
        );
        let key = SessionKey::parse("C1:1.0").unwrap();
        app.store.get_or_create(&key, "U1");
        (app, key, dir, slack)
    }

    #[tokio::test]
    async fn keep_button_touches_and_unmarks() {
        let (app, key, _dir, slack) = app().await;
        app.store.update(&key, |s| {
            s.sweep.idle_card_at = Some(chrono::Utc::now());
        });

        handle_block_action(
            &app,
            BlockAction {
                action_id: "session_keep".into(),
                value: json!({ "session": "C1:1.0" }).to_string(),
                user: "U1".into(),
                channel: "C1".into(),
                message_ts: Some("5.0".into()),
                trigger_id: None,
            },
        )
        .await;

        assert!(app.store.get(&key).unwrap().sweep.idle_card_at.is_none());
        assert!(slack
            .calls()
            .iter()
            .any(|c| c == "unreact:C1:1.0:hourglass"));
    }

    #[tokio::test]
    async fn close_confirm_is_owner_only() {
        let (app, key, _dir, _slack) = app().await;

        // A non-owner click is rejected.
        handle_block_action(
            &app,
            BlockAction {
                action_id: "close_confirm".into(),
                value: json!({ "session": "C1:1.0" }).to_string(),
                user: "U2".into(),
                channel: "C1".into(),
                message_ts: Some("5.0".into()),
                trigger_id: None,
            },
        )
        .await;
        assert!(app.store.get(&key).is_some());

        // The owner's click terminates.
        handle_block_action(
            &app,
            BlockAction {
                action_id: "close_confirm".into(),
                value: json!({ "session": "C1:1.0" }).to_string(),
                user: "U1".into(),
                channel: "C1".into(),
                message_ts: Some("5.0".into()),
                trigger_id: None,
            },
        )
        .await;
        assert!(app.store.get(&key).is_none());
    }
}

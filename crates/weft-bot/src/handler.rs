//! Inbound message entry point.
//!
//! Order per message: command router first (commands never reach the LLM),
//! then the busy gate, then the turn pipeline. Re-entered messages from
//! completed forms and renew continuations flow through the same path.

use std::sync::Arc;

use tracing::warn;

use weft_core::types::SessionKey;

use crate::app::{AppState, InboundMessage};
use crate::commands;
use crate::turn;

pub async fn handle_message(app: Arc<AppState>, msg: InboundMessage) {
    if msg.text.trim().is_empty() {
        return;
    }
    let key = SessionKey::new(msg.channel.clone(), msg.thread_ts.clone());

    if let Some(outcome) = commands::route(&app, &msg).await {
        if let Some(prompt) = outcome.continue_with_prompt {
            if let Err(e) =
                turn::run_turn(app, key, &msg.user, &prompt, outcome.force_workflow).await
            {
                warn!(error = %e, "continuation turn failed");
            }
        }
        return;
    }

    // Renew owns the session until the load turn settles; ordinary messages
    // must not start a turn through the normal path meanwhile.
    if app
        .store
        .get(&key)
        .is_some_and(|session| session.renew.is_some())
    {
        let _ = app
            .slack
            .post_ephemeral(
                &msg.channel,
                &msg.user,
                "컨텍스트 갱신(renew)이 진행 중입니다. 잠시 후 다시 보내주세요.",
                msg.thread_ts.as_deref(),
            )
            .await;
        return;
    }

    // One stream per session: a busy session replies instead of queueing.
    if app.coordinator.is_active(&key) {
        let _ = app
            .slack
            .post_ephemeral(
                &msg.channel,
                &msg.user,
                "이전 요청을 아직 처리 중입니다. 완료 후 다시 보내주세요.",
                msg.thread_ts.as_deref(),
            )
            .await;
        return;
    }

    if let Err(e) = turn::run_turn(app, key, &msg.user, &msg.text, None).await {
        warn!(error = %e, "turn failed");
    }
}

//! The turn pipeline: one user message through classification, the agent
//! stream, UI mirrors, recording, and the renew protocol.

use std::sync::Arc;

use tracing::{info, warn};

use weft_agent::client::AgentRequest;
use weft_agent::processor;
use weft_agent::tracker::ToolUseTracker;
use weft_core::types::{RenewPhase, SessionKey, SessionState, Workflow};
use weft_sessions::error::SessionError;
use weft_slack::reactions::Status;
use weft_slack::system::post_system_message;

use crate::app::AppState;
use crate::model_tool;
use crate::sinks::TurnSinks;

/// Prompt driving the renew save turn.
pub const RENEW_SAVE_PROMPT: &str =
    "현재 대화 컨텍스트를 저장해주세요. save 스킬을 실행하고 결과를 SAVE_CONTEXT_RESULT 명령으로 보고하세요.";

/// Workflow-specific system prompt preamble.
fn workflow_prompt(workflow: Workflow) -> String {
    let body = match workflow {
        Workflow::Onboarding => "신규 사용자의 온보딩을 안내한다. 사용 가능한 명령과 워크플로우를 소개한다.",
        Workflow::JiraExecutiveSummary => "첨부된 Jira 이슈를 임원 보고용으로 요약한다.",
        Workflow::JiraBrainstorming => "Jira 이슈를 주제로 해결 방안을 브레인스토밍한다.",
        Workflow::JiraPlanning => "Jira 이슈의 구현 계획을 세운다.",
        Workflow::JiraCreatePr => "Jira 이슈를 구현하고 PR을 생성한다.",
        Workflow::PrReview => "첨부된 PR을 리뷰하고 개선점을 정리한다.",
        Workflow::PrFixAndUpdate => "리뷰 코멘트를 반영해 PR을 수정한다.",
        Workflow::PrDocsConfluence => "PR의 변경 사항을 Confluence 문서로 정리한다.",
        Workflow::Deploy => "배포 절차를 진행하고 각 단계를 보고한다.",
        Workflow::Default => "Slack 스레드에서 사용자의 요청을 처리한다.",
    };
    format!(
        "당신은 Slack 스레드에 상주하는 어시스턴트입니다. {body} \
         구조화된 지시는 session_links / channel_message / user_choice JSON 지시문으로 전달하세요."
    )
}

/// Run one full turn for `key`. Claims the session's request slot; a busy
/// session gets an informative reply instead of queued work.
pub async fn run_turn(
    app: Arc<AppState>,
    key: SessionKey,
    user: &str,
    text: &str,
    force_workflow: Option<Workflow>,
) -> anyhow::Result<()> {
    let guard = match app.coordinator.try_begin(&key) {
        Ok(guard) => guard,
        Err(SessionError::RequestActive { .. }) => {
            let _ = app
                .slack
                .post_ephemeral(
                    &key.channel,
                    user,
                    "이미 요청을 처리 중입니다. 완료 후 다시 보내주세요.",
                    key.root_ts(),
                )
                .await;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let cancel = guard.cancellation_token();

    let session = app.store.get_or_create(&key, user);
    let renew_phase = session.renew;
    app.store.update(&key, |s| {
        s.initiator = user.to_string();
        s.touch();
        s.sweep = Default::default();
        if s.state == SessionState::Sleeping {
            s.state = SessionState::Main;
            s.sleep_started_at = None;
        }
    });
    if session.state == SessionState::Sleeping {
        if let Some(root) = key.root_ts() {
            let _ = app.slack.remove_reaction(&key.channel, root, "zzz").await;
        }
    }

    // Classification runs once per context: on the first message or after a
    // reset. Renew turns skip it — they carry protocol prompts, not intent.
    if let Some(workflow) = force_workflow {
        app.store.update(&key, |s| s.workflow = Some(workflow));
    } else if session.workflow.is_none() && renew_phase.is_none() {
        let result = app.dispatch.dispatch(text, Some(&cancel)).await;
        info!(session = %key, workflow = %result.workflow, "session classified");
        app.store.update(&key, |s| {
            s.workflow = Some(result.workflow);
            s.title = Some(result.title.clone());
        });
        for link in [result.links.issue, result.links.pr, result.links.doc]
            .into_iter()
            .flatten()
        {
            app.store.set_link(&key, link);
        }
        if let Some(root) = key.root_ts() {
            let _ = app
                .slack
                .set_thread_title(&key.channel, root, &result.title)
                .await;
        }
    }

    // Ensure a journal record and log the user turn.
    let conversation_id = match app.store.get(&key).and_then(|s| s.conversation_id) {
        Some(id) => id,
        None => {
            // Terminated mid-flight (close button) — nothing left to do.
            let Some(session) = app.store.get(&key) else {
                return Ok(());
            };
            let id = app
                .recorder
                .create_conversation(
                    &key.channel,
                    key.root_ts(),
                    &session.owner,
                    session.title.as_deref(),
                    session.workflow.map(|w| w.to_string()).as_deref(),
                )
                .await;
            app.store.update(&key, |s| s.conversation_id = Some(id.clone()));
            id
        }
    };
    app.recorder.record_user_turn(&conversation_id, user, text);

    if let Some(root) = key.root_ts() {
        app.reactions
            .update(&key.format(), &key.channel, root, Status::Thinking)
            .await;
        let _ = app
            .slack
            .set_thread_status(&key.channel, root, "생각 중…")
            .await;
    }
    crate::panel::update_panel(&app, &key).await;

    // Build the request from current session state and per-user preferences.
    let Some(session) = app.store.get(&key) else {
        return Ok(());
    };
    let prefs = app.prefs_for(user);
    let workflow = session.workflow.unwrap_or_default();
    let request = AgentRequest {
        prompt: text.to_string(),
        system_prompt: Some(workflow_prompt(workflow)),
        model: prefs.model.unwrap_or_else(|| session.model.clone()),
        session_id: session.agent_session_id.clone(),
        working_dir: Some(session.working_dir.clone()),
        tools: model_tool::definitions(),
    };

    let tracker = Arc::new(ToolUseTracker::new());
    let sinks = TurnSinks {
        app: Arc::clone(&app),
        key: key.clone(),
        tracker: Arc::clone(&tracker),
    };

    let stream = app.agent.stream_turn(request, cancel.clone());
    let outcome = processor::run(stream, &sinks, &tracker, &cancel).await;
    tracker.cleanup_after(std::time::Duration::from_secs(30));

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(session = %key, error = %e, "stream failed");
            if let Some(root) = key.root_ts() {
                app.reactions
                    .update(&key.format(), &key.channel, root, Status::Error)
                    .await;
            }
            let _ = post_system_message(
                app.slack.as_ref(),
                &key.channel,
                key.root_ts(),
                &format!("⚠️ 요청 처리 중 오류가 발생했습니다: {e}"),
            )
            .await;
            drop(guard);
            crate::panel::update_panel(&app, &key).await;
            return Ok(());
        }
    };

    // Fold the outcome back into the session.
    app.store.update(&key, |s| {
        if let Some(id) = &outcome.agent_session_id {
            s.agent_session_id = Some(id.clone());
        }
        if outcome.success && s.state == SessionState::Initializing {
            s.state = SessionState::Main;
        }
        s.panel.active_tool = None;
    });

    if !outcome.collected_text.trim().is_empty() {
        app.recorder
            .record_assistant_turn(&conversation_id, outcome.collected_text.trim());
    }

    let status = if outcome.aborted {
        Status::Cancelled
    } else if outcome.success {
        Status::Completed
    } else {
        Status::Error
    };
    if let Some(root) = key.root_ts() {
        app.reactions
            .update(&key.format(), &key.channel, root, status)
            .await;
        let _ = app.slack.set_thread_status(&key.channel, root, "").await;
        if outcome.prompt_too_long {
            app.context_emoji
                .force_empty(&key.format(), &key.channel, root)
                .await;
        }
    }

    // Release the slot before any renew continuation re-enters the pipeline.
    drop(guard);

    if !outcome.aborted {
        match renew_phase {
            Some(RenewPhase::PendingSave) => {
                handle_renew_save(&app, &key, user, &outcome.collected_text).await?;
            }
            Some(RenewPhase::PendingLoad) => {
                if outcome.success {
                    app.renew.complete_load(&key)?;
                    info!(session = %key, "renew load turn completed");
                }
            }
            None => {}
        }
    }

    crate::panel::update_panel(&app, &key).await;
    Ok(())
}

/// Settle the renew save turn and, on success, drive the load turn.
async fn handle_renew_save(
    app: &Arc<AppState>,
    key: &SessionKey,
    user: &str,
    collected_text: &str,
) -> anyhow::Result<()> {
    match app.renew.resolve_after_save_turn(key, collected_text) {
        Ok(save) => {
            let prompt = app.renew.prepare_load(key)?;
            info!(session = %key, save_id = %save.id, "renew save settled — loading");
            Box::pin(run_turn(
                Arc::clone(app),
                key.clone(),
                user,
                &prompt,
                None,
            ))
            .await
        }
        Err(e) => {
            warn!(session = %key, error = %e, "renew save failed");
            let _ = post_system_message(
                app.slack.as_ref(),
                &key.channel,
                key.root_ts(),
                "⚠️ 컨텍스트 저장에 실패했습니다. 세션은 변경되지 않았습니다. `renew`를 다시 시도해주세요.",
            )
            .await;
            Ok(())
        }
    }
}

//! End-to-end pipeline tests: message in, Slack side-effects out, with the
//! agent and the transport both scripted.

use std::sync::Arc;

use tokio::sync::mpsc;

use weft_agent::events::{AgentEvent, ContentItem, FlatUsage, ToolCallRequest, TurnResult};
use weft_core::config::WeftConfig;
use weft_core::types::{SessionKey, SessionState, Workflow};
use weft_recorder::Recorder;

use crate::app::{AppState, InboundMessage};
use crate::handler::handle_message;
use crate::testutil::{FakeSlack, ScriptedAgent};

fn text_event(text: &str) -> AgentEvent {
    AgentEvent::Assistant {
        content: vec![ContentItem::Text {
            text: text.to_string(),
        }],
    }
}

fn success(session_id: &str, input_tokens: u64) -> AgentEvent {
    AgentEvent::Result(TurnResult {
        subtype: "success".into(),
        session_id: Some(session_id.into()),
        usage: Some(FlatUsage {
            input_tokens,
            output_tokens: 0,
            ..Default::default()
        }),
        ..Default::default()
    })
}

struct Harness {
    app: Arc<AppState>,
    slack: Arc<FakeSlack>,
    agent: Arc<ScriptedAgent>,
    rx: mpsc::Receiver<InboundMessage>,
    _dir: tempfile::TempDir,
}

fn harness(turns: Vec<Vec<AgentEvent>>, classification: Option<&str>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let (tx, rx) = mpsc::channel(16);
    let slack = Arc::new(FakeSlack::default());
    let agent = Arc::new(ScriptedAgent::new(turns, classification));
    let app = AppState::new(
        WeftConfig::default(),
        slack.clone(),
        agent.clone(),
        Recorder::new(dir.path()).unwrap(),
        tx,
    );
    Harness {
        app,
        slack,
        agent,
        rx,
        _dir: dir,
    }
}

fn message(text: &str) -> InboundMessage {
    InboundMessage {
        user: "U1".into(),
        channel: "C1".into(),
        thread_ts: Some("1712.000100".into()),
        text: text.into(),
    }
}

fn key() -> SessionKey {
    SessionKey::parse("C1:1712.000100").unwrap()
}

#[tokio::test]
async fn fresh_thread_classifies_and_replies() {
    let h = harness(
        vec![vec![text_event("PTN-1234 요약입니다."), success("sdk-1", 100)]],
        Some(r#"{"workflow":"jira-executive-summary","title":"Summarize PTN-1234"}"#),
    );

    handle_message(
        Arc::clone(&h.app),
        message("Summarize PTN-1234 https://acme.atlassian.net/browse/PTN-1234"),
    )
    .await;

    let session = h.app.store.get(&key()).unwrap();
    assert_eq!(session.workflow, Some(Workflow::JiraExecutiveSummary));
    assert_eq!(session.title.as_deref(), Some("Summarize PTN-1234"));
    assert_eq!(session.state, SessionState::Main);
    assert_eq!(session.agent_session_id.as_deref(), Some("sdk-1"));
    assert_eq!(
        session.links.issue.unwrap().label.as_deref(),
        Some("PTN-1234")
    );

    let calls = h.slack.calls();
    assert!(calls
        .iter()
        .any(|c| c.contains("post:C1:1712.000100:PTN-1234 요약입니다.")));
    assert!(calls.iter().any(|c| c == "title:Summarize PTN-1234"));
}

#[tokio::test]
async fn session_links_directive_attaches_pr() {
    let h = harness(
        vec![vec![
            text_event(
                "Done.\n{\"type\":\"session_links\",\"pr\":\"https://github.com/acme/svc/pull/7\"}",
            ),
            success("sdk-1", 10),
        ]],
        None,
    );

    handle_message(Arc::clone(&h.app), message("wrap it up")).await;

    let session = h.app.store.get(&key()).unwrap();
    let pr = session.links.pr.unwrap();
    assert_eq!(pr.label.as_deref(), Some("PR #7"));

    // Directive stripped from the posted message.
    let calls = h.slack.calls();
    assert!(calls.iter().any(|c| c.ends_with(":Done.")));
    assert!(!calls.iter().any(|c| c.contains("session_links")));
}

#[tokio::test]
async fn renew_happy_path_via_fallback() {
    let mut h = harness(
        vec![
            // First: an ordinary turn establishing the session.
            vec![text_event("리뷰 진행 중"), success("sdk-1", 10)],
            // Save turn: fallback save_result at end of text.
            vec![
                text_event(
                    "저장했습니다.\n{\"save_result\":{\"success\":true,\"id\":\"save_42\"}}",
                ),
                success("sdk-1", 10),
            ],
            // Load turn on the fresh context.
            vec![text_event("이어서 진행합니다."), success("sdk-2", 5)],
        ],
        None,
    );

    handle_message(Arc::clone(&h.app), message("review my PR")).await;
    handle_message(Arc::clone(&h.app), message("renew continue PR review")).await;

    let session = h.app.store.get(&key()).unwrap();
    assert_eq!(session.renew, None);
    assert_eq!(session.renew_user_message, None);
    assert_eq!(session.renew_save_result, None);
    assert_eq!(session.agent_session_id.as_deref(), Some("sdk-2"));

    // The load turn carried the composed continuation prompt on a reset
    // context (no session_id resumed).
    let requests = h.agent.requests.lock().unwrap();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].prompt, "load save_42 then continue PR review");
    assert_eq!(requests[2].session_id, None);
    drop(requests);

    assert!(h.rx.try_recv().is_err());
}

#[tokio::test]
async fn renew_happy_path_via_tool() {
    // The preferred path: the model reports the save through the
    // SAVE_CONTEXT_RESULT command instead of the text fallback.
    let (save_call, _save_rx) = ToolCallRequest::new(
        "tu_save",
        crate::model_tool::SAVE_CONTEXT_RESULT,
        serde_json::json!({ "result": { "success": true, "id": "save_7" } }),
    );
    let h = harness(
        vec![
            vec![text_event("진행 중"), success("sdk-1", 10)],
            vec![AgentEvent::ToolCall(save_call), success("sdk-1", 10)],
            vec![text_event("불러왔습니다"), success("sdk-3", 5)],
        ],
        None,
    );

    handle_message(Arc::clone(&h.app), message("start work")).await;
    handle_message(Arc::clone(&h.app), message("renew 이어서 리뷰")).await;

    let session = h.app.store.get(&key()).unwrap();
    assert_eq!(session.renew, None);
    assert_eq!(session.agent_session_id.as_deref(), Some("sdk-3"));

    let requests = h.agent.requests.lock().unwrap();
    assert_eq!(requests[2].prompt, "load save_7 then 이어서 리뷰");
}

#[tokio::test]
async fn model_reads_and_updates_session_via_tool() {
    let (update_call, mut update_rx) = ToolCallRequest::new(
        "tu_upd",
        crate::model_tool::UPDATE_SESSION,
        serde_json::json!({
            "expectedSequence": 0,
            "operations": [{
                "action": "add",
                "resourceType": "pr",
                "url": "https://github.com/acme/svc/pull/7"
            }]
        }),
    );
    let (get_call, mut get_rx) = ToolCallRequest::new(
        "tu_get",
        crate::model_tool::GET_SESSION,
        serde_json::json!({}),
    );
    let h = harness(
        vec![vec![
            AgentEvent::ToolCall(update_call),
            AgentEvent::ToolCall(get_call),
            text_event("PR을 붙였습니다."),
            success("sdk-1", 10),
        ]],
        None,
    );

    handle_message(Arc::clone(&h.app), message("attach my pr")).await;

    // The update landed on the session through the command wire.
    let session = h.app.store.get(&key()).unwrap();
    assert_eq!(session.links.pr.unwrap().label.as_deref(), Some("PR #7"));
    assert_eq!(session.sequence, 1);

    // Both parked calls received their outcomes.
    let update_outcome = update_rx.try_recv().expect("update answered");
    assert!(!update_outcome.is_error);
    assert_eq!(update_outcome.content["session"]["sequence"], 1);

    let get_outcome = get_rx.try_recv().expect("get answered");
    assert!(!get_outcome.is_error);
    assert_eq!(get_outcome.content["session"]["sequence"], 1);
    assert_eq!(
        get_outcome.content["session"]["prs"]
            .as_array()
            .map(|a| a.len()),
        Some(1)
    );
}

#[tokio::test]
async fn renew_without_save_fails_visibly() {
    let h = harness(
        vec![
            vec![text_event("첫 턴"), success("sdk-1", 10)],
            vec![text_event("저장을 깜빡했습니다"), success("sdk-1", 10)],
        ],
        None,
    );

    handle_message(Arc::clone(&h.app), message("start")).await;
    handle_message(Arc::clone(&h.app), message("renew keep going")).await;

    let session = h.app.store.get(&key()).unwrap();
    assert_eq!(session.renew, None);
    // Context untouched: still the original SDK session.
    assert_eq!(session.agent_session_id.as_deref(), Some("sdk-1"));

    let calls = h.slack.calls();
    assert!(calls.iter().any(|c| c.contains("컨텍스트 저장에 실패")));
}

#[tokio::test]
async fn busy_session_gets_informative_reply() {
    let h = harness(vec![], None);
    h.app.store.get_or_create(&key(), "U1");
    let _guard = h.app.coordinator.try_begin(&key()).unwrap();

    handle_message(Arc::clone(&h.app), message("another request")).await;

    let calls = h.slack.calls();
    assert!(calls
        .iter()
        .any(|c| c.starts_with("ephemeral:C1:U1:") && c.contains("처리 중")));
    // No stream ran.
    assert!(h.agent.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn context_emoji_buckets_over_three_turns() {
    // Window 200k: 36k in use → 82%, 84k → 58%, 164k → 18%.
    let h = harness(
        vec![
            vec![text_event("t1"), success("sdk-1", 36_000)],
            vec![text_event("t2"), success("sdk-1", 84_000)],
            vec![text_event("t3"), success("sdk-1", 164_000)],
        ],
        None,
    );

    for text in ["one", "two", "three"] {
        handle_message(Arc::clone(&h.app), message(text)).await;
    }

    let reactions: Vec<String> = h
        .slack
        .calls()
        .iter()
        .filter(|c| c.ends_with(":80p") || c.ends_with(":60p") || c.ends_with(":40p")
            || c.ends_with(":20p") || c.ends_with(":0p"))
        .cloned()
        .collect();
    assert_eq!(
        reactions,
        vec![
            "react:C1:1712.000100:80p",
            "unreact:C1:1712.000100:80p",
            "react:C1:1712.000100:40p",
            "unreact:C1:1712.000100:40p",
            "react:C1:1712.000100:0p",
        ]
    );
}

#[tokio::test]
async fn unknown_slash_command_never_reaches_llm() {
    let h = harness(vec![], None);
    handle_message(Arc::clone(&h.app), message("/frobnicate now")).await;

    assert!(h.agent.requests.lock().unwrap().is_empty());
    assert!(h
        .slack
        .calls()
        .iter()
        .any(|c| c.contains("알 수 없는 명령어")));
}

#[tokio::test]
async fn new_command_resets_and_continues() {
    let h = harness(
        vec![
            vec![text_event("first"), success("sdk-1", 10)],
            vec![text_event("fresh"), success("sdk-9", 10)],
        ],
        None,
    );

    handle_message(Arc::clone(&h.app), message("hello")).await;
    assert_eq!(
        h.app.store.get(&key()).unwrap().agent_session_id.as_deref(),
        Some("sdk-1")
    );

    handle_message(Arc::clone(&h.app), message("new 다시 시작하자")).await;

    let session = h.app.store.get(&key()).unwrap();
    assert_eq!(session.agent_session_id.as_deref(), Some("sdk-9"));

    let requests = h.agent.requests.lock().unwrap();
    assert_eq!(requests[1].prompt, "다시 시작하자");
    // Reset context: the second stream started without a resumed session.
    assert_eq!(requests[1].session_id, None);
}

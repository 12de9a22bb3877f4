//! Per-thread action panel: a single message under the thread reflecting
//! workflow, status, context usage, and the active tool.
//!
//! Rendering is idempotent by render key — a sha256 of the block payload —
//! so repeated updates with identical content never hit Slack.

use sha2::{Digest, Sha256};
use tracing::debug;

use weft_core::types::{SessionKey, SessionState};
use weft_sessions::types::Session;
use weft_slack::api::MessageOptions;
use weft_slack::blocks;

use crate::app::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelStatus {
    Working,
    Waiting,
    Idle,
    Sleeping,
    Disabled,
}

impl PanelStatus {
    fn badge(&self) -> &'static str {
        match self {
            PanelStatus::Working => "🔄 작업 중",
            PanelStatus::Waiting => "⏳ 선택 대기",
            PanelStatus::Idle => "💤 대기",
            PanelStatus::Sleeping => "😴 잠듦",
            PanelStatus::Disabled => "🚫 비활성",
        }
    }
}

fn status_of(app: &AppState, session: &Session) -> PanelStatus {
    if session.state == SessionState::Sleeping {
        return PanelStatus::Sleeping;
    }
    if app.coordinator.is_active(&session.key) {
        return PanelStatus::Working;
    }
    if app.forms.pending_count(&session.key.format()) > 0 {
        return PanelStatus::Waiting;
    }
    PanelStatus::Idle
}

/// Compose the dashboard blocks for a session.
pub fn render(session: &Session, status: PanelStatus, pending_forms: usize) -> Vec<serde_json::Value> {
    let workflow = session
        .workflow
        .map(|w| w.to_string())
        .unwrap_or_else(|| "미분류".to_string());

    let mut fields = vec![
        format!("*워크플로우*\n`{workflow}`"),
        format!("*상태*\n{}", status.badge()),
    ];
    for link in session.links.iter() {
        fields.push(format!(
            "*{}*\n<{}|{}>",
            link.link_type,
            link.url,
            link.display_label()
        ));
    }

    let mut chips = vec![format!("컨텍스트 {}%", session.usage.remaining_percent())];
    if let Some(tool) = &session.panel.active_tool {
        chips.push(format!("🔧 {tool}"));
    }
    if pending_forms > 0 {
        chips.push(format!("📋 선택 대기 {pending_forms}"));
    }

    vec![
        blocks::section_fields(&fields),
        blocks::context(&chips.join(" · ")),
    ]
}

fn render_key(payload: &[serde_json::Value]) -> String {
    let serialized = serde_json::to_string(payload).unwrap_or_default();
    let digest = Sha256::digest(serialized.as_bytes());
    format!("{digest:x}")
}

/// Post or update the panel message, skipping identical payloads.
pub async fn update_panel(app: &AppState, key: &SessionKey) {
    let Some(session) = app.store.get(key) else {
        return;
    };
    let status = status_of(app, &session);
    let pending = app.forms.pending_count(&key.format());
    let payload = render(&session, status, pending);
    let new_key = render_key(&payload);

    if session.panel.render_key.as_deref() == Some(new_key.as_str()) {
        return;
    }

    let result = match &session.panel.message_ts {
        Some(ts) => app
            .slack
            .update_message(&key.channel, ts, "세션 상태", Some(payload))
            .await
            .map(|_| ts.clone()),
        None => {
            let opts = match key.root_ts() {
                Some(root) => MessageOptions::in_thread(root).with_blocks(payload),
                None => MessageOptions::default().with_blocks(payload),
            };
            app.slack
                .post_message(&key.channel, "세션 상태", &opts)
                .await
                .map(|p| p.ts)
        }
    };

    match result {
        Ok(ts) => {
            app.store.update(key, |s| {
                s.panel.message_ts = Some(ts.clone());
                s.panel.render_key = Some(new_key.clone());
            });
        }
        Err(e) => debug!(session = %key, error = %e, "panel update failed"),
    }
}

//! Session lifecycle commands: listings, terminate/close, new/onboarding,
//! context, renew, link.

use std::str::FromStr;

use chrono::Utc;
use serde_json::json;

use weft_core::types::{LinkType, SessionKey, Workflow};
use weft_dispatch::links::classify_url;
use weft_sessions::types::Session;
use weft_slack::api::MessageOptions;
use weft_slack::blocks;

use super::{CommandContext, CommandOutcome};
use crate::turn::RENEW_SAVE_PROMPT;

/// Default prompt when `onboarding` is invoked bare.
const ONBOARDING_START: &str = "온보딩을 시작해주세요. 제가 할 수 있는 일을 소개해주세요.";

fn describe(session: &Session) -> String {
    let age_hours = Utc::now()
        .signed_duration_since(session.last_activity)
        .num_hours();
    format!(
        "• `{}` — {} / {} / 컨텍스트 {}% / {}시간 전",
        session.key,
        session
            .workflow
            .map(|w| w.to_string())
            .unwrap_or_else(|| "미분류".into()),
        session.state,
        session.usage.remaining_percent(),
        age_hours
    )
}

pub async fn cmd_sessions(ctx: CommandContext) -> anyhow::Result<CommandOutcome> {
    let public = ctx.args.eq_ignore_ascii_case("public");
    let mut mine: Vec<Session> = ctx
        .app
        .store
        .get_all()
        .into_iter()
        .filter(|s| s.owner == ctx.user)
        .collect();
    mine.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));

    let body = if mine.is_empty() {
        "진행 중인 세션이 없습니다.".to_string()
    } else {
        let lines: Vec<String> = mine.iter().map(describe).collect();
        format!("*내 세션 ({})*\n{}", mine.len(), lines.join("\n"))
    };

    if public {
        ctx.say(&body).await;
    } else {
        ctx.say_ephemeral(&body).await;
    }
    Ok(CommandOutcome::done())
}

pub async fn cmd_all_sessions(ctx: CommandContext) -> anyhow::Result<CommandOutcome> {
    let mut sessions = ctx.app.store.get_all();
    sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));

    let body = if sessions.is_empty() {
        "진행 중인 세션이 없습니다.".to_string()
    } else {
        let lines: Vec<String> = sessions.iter().map(describe).collect();
        format!("*전체 세션 ({})*\n{}", sessions.len(), lines.join("\n"))
    };
    ctx.say_ephemeral(&body).await;
    Ok(CommandOutcome::done())
}

pub async fn cmd_terminate(ctx: CommandContext) -> anyhow::Result<CommandOutcome> {
    if ctx.args.is_empty() {
        ctx.say_ephemeral("사용법: `terminate <세션키>`").await;
        return Ok(CommandOutcome::done());
    }
    let key = match SessionKey::parse(&ctx.args) {
        Ok(key) => key,
        Err(_) => {
            ctx.say_ephemeral(&format!("잘못된 세션키입니다: `{}`", ctx.args))
                .await;
            return Ok(CommandOutcome::done());
        }
    };
    let Some(session) = ctx.app.store.get(&key) else {
        ctx.say_ephemeral(&format!("세션을 찾을 수 없습니다: `{key}`")).await;
        return Ok(CommandOutcome::done());
    };
    if session.owner != ctx.user {
        ctx.say_ephemeral("세션 소유자만 삭제할 수 있습니다.").await;
        return Ok(CommandOutcome::done());
    }

    terminate_session(&ctx.app, &key).await;
    ctx.say_ephemeral(&format!("세션 `{key}`를 삭제했습니다.")).await;
    Ok(CommandOutcome::done())
}

/// Shared teardown: cancel the stream, drop forms and UI mirrors, remove the
/// entry. Also used by the close-confirm and idle-card callbacks.
pub async fn terminate_session(app: &std::sync::Arc<crate::app::AppState>, key: &SessionKey) {
    let key_str = key.format();
    app.coordinator.cancel(key).await;
    app.forms.invalidate_session(&key_str).await;
    app.reactions.clear(&key_str).await;
    app.context_emoji.clear(&key_str).await;
    app.store.terminate(key);
}

pub async fn cmd_close(ctx: CommandContext) -> anyhow::Result<CommandOutcome> {
    // Confirmation card; the actual termination runs in the button callback.
    let value = json!({ "session": ctx.key().format() }).to_string();
    let card = vec![
        blocks::section("이 스레드의 세션을 종료할까요? 대화 컨텍스트가 사라집니다."),
        blocks::actions(vec![
            blocks::button_styled("종료", "close_confirm", &value, "danger"),
            blocks::button("취소", "close_cancel", &value),
        ]),
    ];
    let opts = match &ctx.thread_ts {
        Some(ts) => MessageOptions::in_thread(ts).with_blocks(card),
        None => MessageOptions::default().with_blocks(card),
    };
    let _ = ctx
        .app
        .slack
        .post_message(&ctx.channel, "세션을 종료할까요?", &opts)
        .await;
    Ok(CommandOutcome::done())
}

pub async fn cmd_new(ctx: CommandContext) -> anyhow::Result<CommandOutcome> {
    let key = ctx.key();
    if ctx.app.coordinator.is_active(&key) {
        ctx.app.coordinator.cancel(&key).await;
    }
    ctx.app.forms.invalidate_session(&key.format()).await;
    ctx.app.store.reset_context(&key);
    ctx.say("컨텍스트를 초기화했습니다. 새 대화를 시작합니다.").await;

    if ctx.args.is_empty() {
        Ok(CommandOutcome::done())
    } else {
        Ok(CommandOutcome::continue_with(ctx.args.clone()))
    }
}

pub async fn cmd_onboarding(ctx: CommandContext) -> anyhow::Result<CommandOutcome> {
    let key = ctx.key();
    ctx.app.store.get_or_create(&key, &ctx.user);
    ctx.app.forms.invalidate_session(&key.format()).await;
    ctx.app.store.reset_context(&key);

    let prompt = if ctx.args.is_empty() {
        ONBOARDING_START.to_string()
    } else {
        ctx.args.clone()
    };
    Ok(CommandOutcome::continue_with(prompt).with_workflow(Workflow::Onboarding))
}

pub async fn cmd_context(ctx: CommandContext) -> anyhow::Result<CommandOutcome> {
    let Some(session) = ctx.app.store.get(&ctx.key()) else {
        return Ok(CommandOutcome::done());
    };
    let usage = &session.usage;
    let body = format!(
        "*컨텍스트 사용량*\n\
         - 현재 입력/출력: {} / {} 토큰\n\
         - 캐시 읽기/생성: {} / {} 토큰\n\
         - 컨텍스트 윈도우: {} 토큰 (잔여 {}%)\n\
         - 누적 입력/출력: {} / {} 토큰\n\
         - 누적 비용: ${:.4}",
        usage.current_input,
        usage.current_output,
        usage.current_cache_read,
        usage.current_cache_create,
        usage.context_window,
        usage.remaining_percent(),
        usage.total_input,
        usage.total_output,
        usage.total_cost_usd,
    );
    ctx.say_ephemeral(&body).await;
    Ok(CommandOutcome::done())
}

pub async fn cmd_renew(ctx: CommandContext) -> anyhow::Result<CommandOutcome> {
    let message = if ctx.args.is_empty() {
        None
    } else {
        Some(ctx.args.clone())
    };
    match ctx.app.renew.begin(&ctx.key(), message) {
        Ok(()) => {
            ctx.say("컨텍스트를 저장한 뒤 초기화하고 이어갑니다.").await;
            Ok(CommandOutcome::continue_with(RENEW_SAVE_PROMPT))
        }
        Err(e) => {
            ctx.say_ephemeral(&format!("renew를 시작할 수 없습니다: {e}")).await;
            Ok(CommandOutcome::done())
        }
    }
}

pub async fn cmd_link(ctx: CommandContext) -> anyhow::Result<CommandOutcome> {
    let Some((type_raw, url)) = ctx.args.split_once(char::is_whitespace) else {
        ctx.say_ephemeral("사용법: `link issue|pr|doc <url>`").await;
        return Ok(CommandOutcome::done());
    };
    let Ok(link_type) = LinkType::from_str(type_raw.trim()) else {
        ctx.say_ephemeral(&format!("알 수 없는 링크 유형입니다: `{type_raw}`"))
            .await;
        return Ok(CommandOutcome::done());
    };

    let url = url.trim().trim_matches(['<', '>']);
    let link = match classify_url(url) {
        Some(mut link) => {
            // The user's stated type wins over the URL-derived one.
            link.link_type = link_type;
            link
        }
        None if url.starts_with("http") => {
            weft_core::types::SessionLink::new(url, link_type, Default::default())
        }
        None => {
            ctx.say_ephemeral(&format!("URL로 보이지 않습니다: `{url}`")).await;
            return Ok(CommandOutcome::done());
        }
    };

    let label = link.display_label().to_string();
    ctx.app.store.set_link(&ctx.key(), link);
    crate::panel::update_panel(&ctx.app, &ctx.key()).await;
    ctx.say(&format!("{link_type} 링크를 첨부했습니다: {label}")).await;
    Ok(CommandOutcome::done())
}

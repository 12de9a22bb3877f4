//! Textual command router.
//!
//! Commands are dispatched through a statically typed registry keyed by
//! keyword — no string-matching scattered through handlers. Each entry
//! declares its capabilities (needs a session? owner-only?); the router
//! enforces them before the handler runs. A message that looks like a
//! command but isn't one gets an "unrecognized" reply and never reaches the
//! LLM.

pub mod prefs;
pub mod session;

use std::sync::Arc;

use futures_util::future::BoxFuture;

use weft_core::types::{SessionKey, Workflow};
use weft_slack::system::post_system_message;

use crate::app::{AppState, InboundMessage};

/// Execution context handed to a command handler. Owns its strings so the
/// handler future is `'static`.
pub struct CommandContext {
    pub app: Arc<AppState>,
    pub user: String,
    pub channel: String,
    pub thread_ts: Option<String>,
    /// Everything after the keyword, trimmed.
    pub args: String,
}

impl CommandContext {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.channel.clone(), self.thread_ts.clone())
    }

    /// Post a ⚡-marked system reply into the thread.
    pub async fn say(&self, text: &str) {
        let _ = post_system_message(
            self.app.slack.as_ref(),
            &self.channel,
            self.thread_ts.as_deref(),
            text,
        )
        .await;
    }

    /// Reply only to the invoking user.
    pub async fn say_ephemeral(&self, text: &str) {
        let _ = self
            .app
            .slack
            .post_ephemeral(&self.channel, &self.user, text, self.thread_ts.as_deref())
            .await;
    }
}

/// What a handled command asks the caller to do next.
#[derive(Debug, Default)]
pub struct CommandOutcome {
    pub handled: bool,
    /// Tail-call back into the streaming engine with this prompt.
    pub continue_with_prompt: Option<String>,
    pub force_workflow: Option<Workflow>,
}

impl CommandOutcome {
    pub fn done() -> Self {
        Self {
            handled: true,
            ..Default::default()
        }
    }

    pub fn continue_with(prompt: impl Into<String>) -> Self {
        Self {
            handled: true,
            continue_with_prompt: Some(prompt.into()),
            ..Default::default()
        }
    }

    pub fn with_workflow(mut self, workflow: Workflow) -> Self {
        self.force_workflow = Some(workflow);
        self
    }
}

type HandlerFn = fn(CommandContext) -> BoxFuture<'static, anyhow::Result<CommandOutcome>>;

/// One registry entry: keyword, usage, and declared capabilities.
pub struct CommandSpec {
    pub keyword: &'static str,
    pub usage: &'static str,
    pub description: &'static str,
    /// The current thread must already hold a session.
    pub needs_session: bool,
    /// Only the session owner may invoke it.
    pub owner_only: bool,
    pub run: HandlerFn,
}

/// The closed command set. Order is the help-text order.
pub fn registry() -> &'static [CommandSpec] {
    REGISTRY
}

static REGISTRY: &[CommandSpec] = &[
    CommandSpec {
        keyword: "help",
        usage: "help",
        description: "명령어 목록",
        needs_session: false,
        owner_only: false,
        run: |ctx| Box::pin(cmd_help(ctx)),
    },
    CommandSpec {
        keyword: "cwd",
        usage: "cwd",
        description: "작업 디렉토리 표시 (변경 불가)",
        needs_session: false,
        owner_only: false,
        run: |ctx| Box::pin(prefs::cmd_cwd(ctx)),
    },
    CommandSpec {
        keyword: "mcp",
        usage: "mcp [reload]",
        description: "외부 도구 서버 설정 표시/재로드",
        needs_session: false,
        owner_only: false,
        run: |ctx| Box::pin(prefs::cmd_mcp(ctx)),
    },
    CommandSpec {
        keyword: "bypass",
        usage: "bypass",
        description: "도구 권한 우회 토글",
        needs_session: false,
        owner_only: false,
        run: |ctx| Box::pin(prefs::cmd_bypass(ctx)),
    },
    CommandSpec {
        keyword: "persona",
        usage: "persona [이름]",
        description: "프롬프트 페르소나 조회/설정",
        needs_session: false,
        owner_only: false,
        run: |ctx| Box::pin(prefs::cmd_persona(ctx)),
    },
    CommandSpec {
        keyword: "model",
        usage: "model [이름]",
        description: "LLM 모델 조회/설정",
        needs_session: false,
        owner_only: false,
        run: |ctx| Box::pin(prefs::cmd_model(ctx)),
    },
    CommandSpec {
        keyword: "sessions",
        usage: "sessions [public]",
        description: "내 세션 목록",
        needs_session: false,
        owner_only: false,
        run: |ctx| Box::pin(session::cmd_sessions(ctx)),
    },
    CommandSpec {
        keyword: "all_sessions",
        usage: "all_sessions",
        description: "전체 세션 목록",
        needs_session: false,
        owner_only: false,
        run: |ctx| Box::pin(session::cmd_all_sessions(ctx)),
    },
    CommandSpec {
        keyword: "terminate",
        usage: "terminate <세션키>",
        description: "세션 삭제 (소유자 전용)",
        needs_session: false,
        owner_only: false,
        run: |ctx| Box::pin(session::cmd_terminate(ctx)),
    },
    CommandSpec {
        keyword: "close",
        usage: "close",
        description: "현재 스레드 세션 종료",
        needs_session: true,
        owner_only: true,
        run: |ctx| Box::pin(session::cmd_close(ctx)),
    },
    CommandSpec {
        keyword: "new",
        usage: "new [프롬프트]",
        description: "컨텍스트 초기화 후 새로 시작",
        needs_session: true,
        owner_only: false,
        run: |ctx| Box::pin(session::cmd_new(ctx)),
    },
    CommandSpec {
        keyword: "onboarding",
        usage: "onboarding [프롬프트]",
        description: "온보딩 워크플로우로 재시작",
        needs_session: false,
        owner_only: false,
        run: |ctx| Box::pin(session::cmd_onboarding(ctx)),
    },
    CommandSpec {
        keyword: "context",
        usage: "context",
        description: "컨텍스트 사용량/비용 표시",
        needs_session: true,
        owner_only: false,
        run: |ctx| Box::pin(session::cmd_context(ctx)),
    },
    CommandSpec {
        keyword: "renew",
        usage: "renew [이어갈 내용]",
        description: "컨텍스트 저장 후 초기화하고 이어가기",
        needs_session: true,
        owner_only: false,
        run: |ctx| Box::pin(session::cmd_renew(ctx)),
    },
    CommandSpec {
        keyword: "link",
        usage: "link issue|pr|doc <url>",
        description: "세션에 링크 첨부",
        needs_session: true,
        owner_only: false,
        run: |ctx| Box::pin(session::cmd_link(ctx)),
    },
];

async fn cmd_help(ctx: CommandContext) -> anyhow::Result<CommandOutcome> {
    let mut out = String::from("*weft 명령어*\n");
    for spec in registry() {
        out.push_str(&format!("- `{}` — {}\n", spec.usage, spec.description));
    }
    ctx.say_ephemeral(&out).await;
    Ok(CommandOutcome::done())
}

/// Route one inbound message through the registry.
///
/// Returns `None` when the message is not a command at all (→ the LLM path).
pub async fn route(app: &Arc<AppState>, msg: &InboundMessage) -> Option<CommandOutcome> {
    let trimmed = msg.text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let slash_prefixed = trimmed.starts_with('/');
    let stripped = trimmed.trim_start_matches('/');
    let (first, rest) = match stripped.split_once(char::is_whitespace) {
        Some((first, rest)) => (first, rest.trim()),
        None => (stripped, ""),
    };
    let keyword = first.to_lowercase();

    let Some(spec) = registry().iter().find(|spec| spec.keyword == keyword) else {
        if slash_prefixed {
            // Looks like a command, isn't one. Reply and stop — the LLM is
            // not invoked for malformed commands.
            let _ = app
                .slack
                .post_ephemeral(
                    &msg.channel,
                    &msg.user,
                    &format!("알 수 없는 명령어입니다: `{first}`. `help`를 입력해보세요."),
                    msg.thread_ts.as_deref(),
                )
                .await;
            return Some(CommandOutcome::done());
        }
        return None;
    };

    let ctx = CommandContext {
        app: Arc::clone(app),
        user: msg.user.clone(),
        channel: msg.channel.clone(),
        thread_ts: msg.thread_ts.clone(),
        args: rest.to_string(),
    };

    // Capability gates declared on the spec.
    if spec.needs_session || spec.owner_only {
        match app.store.get(&ctx.key()) {
            None if spec.needs_session => {
                ctx.say_ephemeral("이 스레드에는 아직 세션이 없습니다.").await;
                return Some(CommandOutcome::done());
            }
            Some(session) if spec.owner_only && session.owner != ctx.user => {
                ctx.say_ephemeral("세션 소유자만 사용할 수 있는 명령어입니다.")
                    .await;
                return Some(CommandOutcome::done());
            }
            _ => {}
        }
    }

    match (spec.run)(ctx).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            tracing::warn!(keyword = spec.keyword, error = %e, "command failed");
            let _ = app
                .slack
                .post_ephemeral(
                    &msg.channel,
                    &msg.user,
                    &format!("명령 처리 중 오류가 발생했습니다: {e}"),
                    msg.thread_ts.as_deref(),
                )
                .await;
            Some(CommandOutcome::done())
        }
    }
}

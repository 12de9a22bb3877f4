//! User-preference and environment commands: `cwd`, `mcp`, `bypass`,
//! `persona`, `model`.

use super::{CommandContext, CommandOutcome};

/// Known model aliases for user-friendly switching.
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("opus", "claude-opus-4-5"),
    ("sonnet", "claude-sonnet-4-5"),
    ("haiku", "claude-haiku-4-5"),
];

fn resolve_model_alias(input: &str) -> Option<&'static str> {
    let lower = input.to_lowercase();
    MODEL_ALIASES
        .iter()
        .find(|(alias, full)| lower == *alias || lower == *full)
        .map(|(_, full)| *full)
}

pub async fn cmd_cwd(ctx: CommandContext) -> anyhow::Result<CommandOutcome> {
    let dir = ctx
        .app
        .store
        .get(&ctx.key())
        .map(|s| s.working_dir)
        .unwrap_or_else(|| ctx.app.config.agent.working_dir.clone());
    ctx.say_ephemeral(&format!(
        "작업 디렉토리: `{dir}`\n디렉토리 변경은 비활성화되어 있습니다."
    ))
    .await;
    Ok(CommandOutcome::done())
}

pub async fn cmd_mcp(ctx: CommandContext) -> anyhow::Result<CommandOutcome> {
    let path = &ctx.app.config.data.mcp_servers;
    let reload = ctx.args.eq_ignore_ascii_case("reload");

    let listing = match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(value) => {
                let names: Vec<String> = value["mcpServers"]
                    .as_object()
                    .map(|servers| servers.keys().cloned().collect())
                    .unwrap_or_default();
                if names.is_empty() {
                    "등록된 MCP 서버가 없습니다.".to_string()
                } else {
                    format!("MCP 서버: {}", names.join(", "))
                }
            }
            Err(e) => format!("`{path}` 파싱 실패: {e}"),
        },
        Err(_) => format!("`{path}` 파일이 없습니다."),
    };

    if reload {
        ctx.say_ephemeral(&format!("MCP 설정을 다시 읽었습니다.\n{listing}"))
            .await;
    } else {
        ctx.say_ephemeral(&listing).await;
    }
    Ok(CommandOutcome::done())
}

pub async fn cmd_bypass(ctx: CommandContext) -> anyhow::Result<CommandOutcome> {
    let mut enabled = false;
    ctx.app.update_prefs(&ctx.user, |p| {
        p.bypass = !p.bypass;
        enabled = p.bypass;
    });
    ctx.say_ephemeral(if enabled {
        "도구 권한 우회가 켜졌습니다. 도구 실행 확인을 건너뜁니다."
    } else {
        "도구 권한 우회가 꺼졌습니다."
    })
    .await;
    Ok(CommandOutcome::done())
}

pub async fn cmd_persona(ctx: CommandContext) -> anyhow::Result<CommandOutcome> {
    if ctx.args.is_empty() {
        let current = ctx
            .app
            .prefs_for(&ctx.user)
            .persona
            .unwrap_or_else(|| "기본".to_string());
        ctx.say_ephemeral(&format!("현재 페르소나: `{current}`")).await;
    } else {
        let persona = ctx.args.clone();
        ctx.app
            .update_prefs(&ctx.user, |p| p.persona = Some(persona.clone()));
        ctx.say_ephemeral(&format!("페르소나를 `{persona}`(으)로 설정했습니다."))
            .await;
    }
    Ok(CommandOutcome::done())
}

pub async fn cmd_model(ctx: CommandContext) -> anyhow::Result<CommandOutcome> {
    if ctx.args.is_empty() {
        let current = ctx
            .app
            .prefs_for(&ctx.user)
            .model
            .unwrap_or_else(|| ctx.app.config.agent.model.clone());
        let aliases: Vec<&str> = MODEL_ALIASES.iter().map(|(a, _)| *a).collect();
        ctx.say_ephemeral(&format!(
            "현재 모델: `{current}`\n사용 가능: {}",
            aliases.join(", ")
        ))
        .await;
        return Ok(CommandOutcome::done());
    }

    match resolve_model_alias(&ctx.args) {
        Some(model) => {
            ctx.app
                .update_prefs(&ctx.user, |p| p.model = Some(model.to_string()));
            ctx.say_ephemeral(&format!("모델을 `{model}`(으)로 설정했습니다."))
                .await;
        }
        None => {
            ctx.say_ephemeral(&format!(
                "알 수 없는 모델입니다: `{}`. 사용 가능: opus, sonnet, haiku",
                ctx.args
            ))
            .await;
        }
    }
    Ok(CommandOutcome::done())
}

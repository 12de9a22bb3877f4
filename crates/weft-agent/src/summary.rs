//! Human-readable one-line summaries of tool invocations for Slack.

use serde_json::Value;

use weft_core::types::truncate_chars;

/// Preview width for tool input excerpts.
const PREVIEW_CHARS: usize = 80;

/// Render a compact Slack line for a tool call, e.g.
/// `🔧 Bash · cargo test` or `📖 Read · src/main.rs`.
pub fn format_tool_use(name: &str, input: &Value) -> String {
    let (icon, detail) = match name {
        "Bash" => ("🔧", pick(input, &["command"])),
        "Read" => ("📖", pick(input, &["file_path", "path"])),
        "Write" | "Edit" => ("✏️", pick(input, &["file_path", "path"])),
        "Glob" | "Grep" => ("🔍", pick(input, &["pattern"])),
        "WebFetch" | "WebSearch" => ("🌐", pick(input, &["url", "query"])),
        "TodoWrite" => ("📝", Some("할 일 목록 업데이트".to_string())),
        _ => ("⚙️", pick(input, &["command", "query", "path", "url"])),
    };

    match detail {
        Some(detail) => format!("{icon} *{name}* · `{}`", truncate_chars(&detail, PREVIEW_CHARS)),
        None => format!("{icon} *{name}*"),
    }
}

/// Render a tool result line: name plus a trimmed excerpt.
pub fn format_tool_result(name: Option<&str>, content: &str, is_error: bool) -> String {
    let label = name.unwrap_or("tool");
    let icon = if is_error { "⚠️" } else { "↩️" };
    let excerpt = truncate_chars(content.trim(), 200);
    if excerpt.is_empty() {
        format!("{icon} *{label}* 완료")
    } else {
        format!("{icon} *{label}*\n```{excerpt}```")
    }
}

fn pick(input: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        input[k]
            .as_str()
            .map(|s| s.split('\n').next().unwrap_or(s).trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bash_shows_first_command_line() {
        let line = format_tool_use("Bash", &json!({"command": "cargo test\n# comment"}));
        assert!(line.contains("cargo test"));
        assert!(!line.contains("comment"));
    }

    #[test]
    fn unknown_tool_falls_back_to_name() {
        let line = format_tool_use("MysteryTool", &json!({}));
        assert!(line.contains("MysteryTool"));
    }

    #[test]
    fn long_input_is_truncated() {
        let cmd = "x".repeat(500);
        let line = format_tool_use("Bash", &json!({ "command": cmd }));
        assert!(line.chars().count() < 120);
        assert!(line.contains('…'));
    }

    #[test]
    fn error_result_marked() {
        let line = format_tool_result(Some("Bash"), "boom", true);
        assert!(line.starts_with("⚠️"));
    }
}

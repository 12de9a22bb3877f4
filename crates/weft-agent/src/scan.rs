//! Balanced-brace JSON extraction from model text.
//!
//! Model output mixes prose with embedded JSON directives, either inside a
//! fenced block tagged `json` or as a bare top-level object. The scanner is
//! string- and escape-aware so braces inside JSON strings never unbalance the
//! match. Fenced blocks are always attempted before raw objects.

use serde_json::Value;

/// Byte range of the first balanced `{…}` object starting at or after `from`.
///
/// Tracks string state and backslash escapes; an unterminated object returns
/// `None` rather than a partial range.
pub fn find_balanced_object(text: &str, from: usize) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let start = bytes[from..].iter().position(|&b| b == b'{')? + from;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, start + i + 1));
                }
            }
            _ => {}
        }
    }
    None
}

/// All fenced ```json blocks as `(outer_range, inner_content)` pairs.
///
/// The outer range covers the backtick fences so removal strips the whole
/// block; the inner content is what gets parsed.
pub fn fenced_json_blocks(text: &str) -> Vec<((usize, usize), String)> {
    let mut blocks = Vec::new();
    let mut cursor = 0;

    while let Some(rel) = text[cursor..].find("```json") {
        let open = cursor + rel;
        let content_start = open + "```json".len();
        let Some(close_rel) = text[content_start..].find("```") else {
            break;
        };
        let content_end = content_start + close_rel;
        let outer_end = content_end + "```".len();
        blocks.push((
            (open, outer_end),
            text[content_start..content_end].trim().to_string(),
        ));
        cursor = outer_end;
    }
    blocks
}

/// Extract the first embedded JSON object matching `matches`.
///
/// Fenced blocks win over raw objects when both are present. Returns the
/// parsed value and the text with the directive (and its fence) removed.
/// Malformed JSON is skipped silently — it stays in the text as prose.
pub fn extract_object<F>(text: &str, matches: F) -> Option<(Value, String)>
where
    F: Fn(&Value) -> bool,
{
    // Pass 1: fenced blocks.
    for ((open, close), content) in fenced_json_blocks(text) {
        if let Ok(value) = serde_json::from_str::<Value>(&content) {
            if value.is_object() && matches(&value) {
                return Some((value, remove_range(text, open, close)));
            }
        }
    }

    // Pass 2: raw balanced objects.
    let mut from = 0;
    while let Some((start, end)) = find_balanced_object(text, from) {
        if let Ok(value) = serde_json::from_str::<Value>(&text[start..end]) {
            if matches(&value) {
                return Some((value, remove_range(text, start, end)));
            }
        }
        from = end;
    }
    None
}

/// Remove `[start, end)` and tidy the seam: runs of 3+ newlines collapse to a
/// paragraph break and the ends are trimmed.
fn remove_range(text: &str, start: usize, end: usize) -> String {
    let mut cleaned = String::with_capacity(text.len());
    cleaned.push_str(&text[..start]);
    cleaned.push_str(&text[end..]);

    while cleaned.contains("\n\n\n") {
        cleaned = cleaned.replace("\n\n\n", "\n\n");
    }
    cleaned.trim().to_string()
}

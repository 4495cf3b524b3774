//! Helpers for reading structure out of free-text reasoner replies.

use serde_json::Value;
use std::sync::OnceLock;

use regex::Regex;

static LIST_ITEM: OnceLock<Regex> = OnceLock::new();

fn list_item_pattern() -> &'static Regex {
    LIST_ITEM.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:(?:step\s*)?\d+\s*[.):]|[-*•])\s+(.+?)\s*$")
            .expect("Invalid list item pattern")
    })
}

/// Extract the items of a numbered (or bulleted) list, in order.
///
/// Lines that are not list items are ignored, so surrounding prose is fine.
pub fn parse_numbered_list(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let caps = list_item_pattern().captures(line)?;
            let item = caps.get(1)?.as_str().trim().trim_matches('*').trim();
            (!item.is_empty()).then(|| item.to_string())
        })
        .collect()
}

/// Interpret a yes/no style reply. Returns `None` when the reply commits to
/// neither.
pub fn parse_yes_no(content: &str) -> Option<bool> {
    let word: String = content
        .trim()
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .chars()
        .take_while(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase();

    match word.as_str() {
        "yes" | "true" | "correct" | "y" => Some(true),
        "no" | "false" | "incorrect" | "n" => Some(false),
        _ => None,
    }
}

/// Pull the first JSON object or array out of a reply.
///
/// Handles, in order:
/// 1. The whole reply being valid JSON
/// 2. A fenced code block (with or without trailing prose)
/// 3. A balanced `{...}` or `[...]` embedded in prose
pub fn extract_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();

    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        if v.is_object() || v.is_array() {
            return Some(v);
        }
    }

    if let Some(inner) = extract_fenced_block(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(inner.trim()) {
            return Some(v);
        }
    }

    for (pos, ch) in trimmed.char_indices() {
        if ch == '{' || ch == '[' {
            if let Some(candidate) = extract_balanced(&trimmed[pos..]) {
                if let Ok(v) = serde_json::from_str::<Value>(candidate) {
                    return Some(v);
                }
            }
        }
    }

    None
}

/// Extract the body of the first markdown code fence in the text.
fn extract_fenced_block(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object or array starting at position 0 of `s`.
///
/// Counts bracket depth, respecting string literals, to find the matching
/// close bracket.
fn extract_balanced(s: &str) -> Option<&str> {
    let (open, close) = match s.chars().next()? {
        '{' => ('{', '}'),
        '[' => ('[', ']'),
        _ => return None,
    };
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

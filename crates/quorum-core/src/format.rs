// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Renders inbound entries into bounded XML-tagged JSON strings for history.
//!
//! The tags give every model a uniform way to tell message sources apart
//! without a schema; the bound keeps a single chatty action result from
//! swallowing a model's whole context window.

use serde_json::{json, Value};

/// Upper bound on a formatted entry, in bytes.
pub const MAX_FORMATTED_LEN: usize = 16 * 1024;

pub fn format_agent_message(from: &str, content: &Value) -> String {
    tagged("agent_message", &json!({ "from": from, "content": content }))
}

pub fn format_action_result(action_id: &str, action_type: &str, result: &Value) -> String {
    tagged(
        "action_result",
        &json!({ "action_id": action_id, "action": action_type, "result": result }),
    )
}

pub fn format_system_event(name: &str, payload: &Value) -> String {
    tagged("system_event", &json!({ "name": name, "payload": payload }))
}

pub fn format_timeout(timer_id: &str) -> String {
    tagged("timeout", &json!({ "timer_id": timer_id }))
}

pub fn format_unknown(value: &Value) -> String {
    tagged("unknown", value)
}

fn tagged(tag: &str, value: &Value) -> String {
    let body = value.to_string();
    let body = truncate(&body, MAX_FORMATTED_LEN);
    format!("<{tag}>{body}</{tag}>")
}

/// Truncate to `max` bytes without splitting a UTF-8 code point, appending a
/// marker when anything was dropped.
fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut idx = max;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    format!("{}…[truncated]", &s[..idx])
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn agent_message_is_tagged_json() {
        let s = format_agent_message("parent", &json!("do the thing"));
        assert!(s.starts_with("<agent_message>"));
        assert!(s.ends_with("</agent_message>"));
        let inner: Value =
            serde_json::from_str(&s["<agent_message>".len()..s.len() - "</agent_message>".len()])
                .unwrap();
        assert_eq!(inner["from"], "parent");
        assert_eq!(inner["content"], "do the thing");
    }

    #[test]
    fn action_result_carries_id_and_type() {
        let s = format_action_result("act-1", "shell", &json!({"exit_code": 0}));
        assert!(s.contains("\"action_id\":\"act-1\""));
        assert!(s.contains("\"action\":\"shell\""));
    }

    #[test]
    fn timeout_names_the_timer() {
        let s = format_timeout("t-9");
        assert!(s.starts_with("<timeout>"));
        assert!(s.contains("t-9"));
    }

    #[test]
    fn unknown_wraps_anything() {
        let s = format_unknown(&json!([1, 2, 3]));
        assert_eq!(s, "<unknown>[1,2,3]</unknown>");
    }

    #[test]
    fn oversized_payload_is_bounded() {
        let big = "x".repeat(MAX_FORMATTED_LEN * 2);
        let s = format_system_event("dump", &json!(big));
        assert!(s.len() < MAX_FORMATTED_LEN + 64);
        assert!(s.contains("…[truncated]"));
    }

    #[test]
    fn truncation_respects_utf8_boundaries() {
        let s = "é".repeat(MAX_FORMATTED_LEN); // 2 bytes per char
        let out = truncate(&s, MAX_FORMATTED_LEN);
        // Must not panic and must remain valid UTF-8 (guaranteed by type).
        assert!(out.len() <= MAX_FORMATTED_LEN + "…[truncated]".len());
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Turns heterogeneous message content into a printable string for
//! reflection prompts. Text survives verbatim; images are replaced by an
//! `[Image]` marker so a condensation call never carries image payloads.

use serde_json::Value;

pub fn stringify(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(stringify_part)
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(_) => stringify_part(content),
        other => other.to_string(),
    }
}

fn stringify_part(part: &Value) -> String {
    if let Value::Object(map) = part {
        // Part-shaped maps: {type: "text", text} / {type: "image", url?}.
        match map.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(text) = map.get("text").and_then(|t| t.as_str()) {
                    return text.to_string();
                }
            }
            Some("image") | Some("image_url") => {
                return match find_url(map) {
                    Some(url) => format!("[Image: {url}]"),
                    None => "[Image]".to_string(),
                };
            }
            _ => {}
        }
        // Text-bearing maps without an explicit type.
        if let Some(text) = map.get("text").and_then(|t| t.as_str()) {
            return text.to_string();
        }
    }
    match part {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn find_url(map: &serde_json::Map<String, Value>) -> Option<&str> {
    if let Some(url) = map.get("url").and_then(|u| u.as_str()) {
        return Some(url);
    }
    map.get("image_url")
        .and_then(|iu| match iu {
            Value::String(s) => Some(s.as_str()),
            Value::Object(inner) => inner.get("url").and_then(|u| u.as_str()),
            _ => None,
        })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

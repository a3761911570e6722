// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Classifies an action result as multimodal or plain text for history
//! storage. Image results become dedicated `image` history entries so the
//! raw payload never travels through the text formatter.

use base64::Engine;
use serde_json::Value;

#[derive(Debug, PartialEq)]
pub enum Detected {
    /// The result carried an image: decoded bytes plus MIME type.
    Image { mime_type: String, data: Vec<u8> },
    /// Anything else; stored as a formatted text result.
    Text,
}

/// Inspect an action result value for an image payload.
///
/// Recognized shapes, in order:
/// - `{type: "image", data: <b64>, mimeType: ...}` at the top level,
/// - the same under a `result` key,
/// - a `content` array containing such a part (MCP-style results).
pub fn detect(result: &Value) -> Detected {
    if let Some(found) = image_from(result) {
        return found;
    }
    if let Some(found) = result.get("result").and_then(image_from) {
        return found;
    }
    if let Some(parts) = locate_content_array(result) {
        for part in parts {
            if let Some(found) = image_from(part) {
                return found;
            }
        }
    }
    Detected::Text
}

fn locate_content_array(result: &Value) -> Option<&Vec<Value>> {
    if let Some(parts) = result.get("content").and_then(|c| c.as_array()) {
        return Some(parts);
    }
    result
        .get("result")
        .and_then(|r| r.get("content"))
        .and_then(|c| c.as_array())
}

fn image_from(v: &Value) -> Option<Detected> {
    let obj = v.as_object()?;
    if obj.get("type").and_then(|t| t.as_str()) != Some("image") {
        return None;
    }
    let b64 = obj.get("data").and_then(|d| d.as_str())?;
    let mime_type = obj
        .get("mimeType")
        .or_else(|| obj.get("mime_type"))
        .and_then(|m| m.as_str())
        .unwrap_or("image/png")
        .to_string();
    let data = base64::engine::general_purpose::STANDARD.decode(b64).ok()?;
    Some(Detected::Image { mime_type, data })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::json;

use crate::{ActionContext, ActionError, ActionHandler, ActionOutcome, ActionRequest};

const MAX_BYTES: usize = 256 * 1024;

/// Reads a file, optionally a line window of it.
pub struct FileReadAction;

#[async_trait]
impl ActionHandler for FileReadAction {
    fn name(&self) -> &str {
        "file_read"
    }

    fn capability_group(&self) -> &str {
        "file_read"
    }

    async fn execute(
        &self,
        req: &ActionRequest,
        _ctx: &ActionContext,
    ) -> Result<ActionOutcome, ActionError> {
        let path = req
            .params
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ActionError::InvalidParams("file_read requires 'path'".into()))?;
        let offset = req.params.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let limit = req.params.get("limit").and_then(|v| v.as_u64());

        let text = match tokio::fs::read_to_string(path).await {
            Ok(t) => t,
            Err(e) => return Ok(ActionOutcome::err(&req.action_id, format!("{path}: {e}"))),
        };

        let lines: Vec<&str> = text.lines().collect();
        let total_lines = lines.len();
        let window: Vec<&str> = match limit {
            Some(n) => lines.into_iter().skip(offset).take(n as usize).collect(),
            None => lines.into_iter().skip(offset).collect(),
        };
        let mut content = window.join("\n");
        if content.len() > MAX_BYTES {
            content.truncate(floor_char_boundary(&content, MAX_BYTES));
            content.push_str("\n…[truncated]");
        }

        Ok(ActionOutcome::ok(
            &req.action_id,
            json!({
                "path": path,
                "content": content,
                "total_lines": total_lines,
            }),
        ))
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    let mut idx = max.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

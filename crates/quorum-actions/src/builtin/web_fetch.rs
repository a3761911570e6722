// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::json;

use crate::{ActionContext, ActionError, ActionHandler, ActionOutcome, ActionRequest};

const MAX_BODY: usize = 100_000;

/// Fetches a URL over HTTP GET.
pub struct WebFetchAction;

#[async_trait]
impl ActionHandler for WebFetchAction {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn capability_group(&self) -> &str {
        "web"
    }

    async fn execute(
        &self,
        req: &ActionRequest,
        _ctx: &ActionContext,
    ) -> Result<ActionOutcome, ActionError> {
        let url = req
            .params
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ActionError::InvalidParams("web_fetch requires 'url'".into()))?;

        let resp = match reqwest::get(url).await {
            Ok(r) => r,
            Err(e) => return Ok(ActionOutcome::err(&req.action_id, format!("{url}: {e}"))),
        };
        let status = resp.status().as_u16();
        let mut body = match resp.text().await {
            Ok(b) => b,
            Err(e) => return Ok(ActionOutcome::err(&req.action_id, format!("{url}: {e}"))),
        };
        if body.len() > MAX_BODY {
            let mut idx = MAX_BODY;
            while idx > 0 && !body.is_char_boundary(idx) {
                idx -= 1;
            }
            body.truncate(idx);
            body.push_str("\n…[truncated]");
        }

        let mut out = ActionOutcome::ok(
            &req.action_id,
            json!({ "url": url, "status": status, "body": body }),
        );
        out.is_error = status >= 400;
        Ok(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::json;

use crate::{ActionContext, ActionError, ActionHandler, ActionOutcome, ActionRequest};

/// Runs a list of sub-actions sequentially.
///
/// Each sub-action goes through the registry's full dispatch path, so it
/// gets its own capability check and telemetry pair. Sub-action ids are
/// derived from the batch id (`<batch>:<index>`) and the agent records one
/// result entry per sub-action.
pub struct BatchSyncAction;

#[async_trait]
impl ActionHandler for BatchSyncAction {
    fn name(&self) -> &str {
        "batch_sync"
    }

    fn capability_group(&self) -> &str {
        "agent"
    }

    async fn execute(
        &self,
        req: &ActionRequest,
        ctx: &ActionContext,
    ) -> Result<ActionOutcome, ActionError> {
        let actions = req
            .params
            .get("actions")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ActionError::InvalidParams("batch_sync requires 'actions'".into()))?;

        let mut sub_outcomes = Vec::with_capacity(actions.len());
        let mut summaries = Vec::with_capacity(actions.len());
        let mut any_error = false;

        for (i, item) in actions.iter().enumerate() {
            let action = item
                .get("action")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    ActionError::InvalidParams(format!("batch item {i} missing 'action'"))
                })?;
            let params = item.get("params").cloned().unwrap_or(json!({}));
            let sub_req = ActionRequest::new(
                format!("{}:{i}", req.action_id),
                action,
                params,
            );

            let outcome = match ctx.registry.execute(&sub_req, ctx).await {
                Ok(outcome) => outcome,
                Err(e) => ActionOutcome::err(&sub_req.action_id, e.to_string()),
            };
            any_error |= outcome.is_error;
            summaries.push(json!({
                "action": action,
                "action_id": outcome.action_id,
                "is_error": outcome.is_error,
            }));
            sub_outcomes.push(outcome);
        }

        let mut out = ActionOutcome::ok(
            &req.action_id,
            json!({ "status": "batch_completed", "actions": summaries }),
        );
        out.is_error = any_error;
        out.sub_outcomes = sub_outcomes;
        Ok(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::json;

use crate::{ActionContext, ActionError, ActionHandler, ActionOutcome, ActionRequest};

/// A reflection step: the agent writes down its current read of the
/// situation without touching the outside world. The thoughts land in
/// history via the action result, giving every model in the pool the same
/// orientation on the next cycle.
pub struct OrientAction;

#[async_trait]
impl ActionHandler for OrientAction {
    fn name(&self) -> &str {
        "orient"
    }

    fn capability_group(&self) -> &str {
        "agent"
    }

    async fn execute(
        &self,
        req: &ActionRequest,
        _ctx: &ActionContext,
    ) -> Result<ActionOutcome, ActionError> {
        let thoughts = req
            .params
            .get("thoughts")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        Ok(ActionOutcome::ok(
            &req.action_id,
            json!({ "status": "oriented", "thoughts": thoughts }),
        ))
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::json;

use crate::{ActionContext, ActionError, ActionHandler, ActionOutcome, ActionRequest};

/// Spawns a child agent under the calling agent.
///
/// Params are the flexible spawn inputs (profile, task, model pool, …) that
/// the runtime normalizes into an agent config. The spawned id travels back
/// on the outcome so the parent can register the child during result
/// integration.
pub struct SpawnAgentAction;

#[async_trait]
impl ActionHandler for SpawnAgentAction {
    fn name(&self) -> &str {
        "spawn_agent"
    }

    fn capability_group(&self) -> &str {
        "agent"
    }

    async fn execute(
        &self,
        req: &ActionRequest,
        ctx: &ActionContext,
    ) -> Result<ActionOutcome, ActionError> {
        match ctx
            .ops
            .spawn_child(&ctx.agent_id, req.params.clone())
            .await
        {
            Ok(child_id) => {
                let mut out = ActionOutcome::ok(
                    &req.action_id,
                    json!({ "status": "spawned", "agent_id": child_id }),
                );
                out.spawned_agent_id = Some(child_id);
                Ok(out)
            }
            Err(ActionError::InvalidParams(m)) => Ok(ActionOutcome::err(&req.action_id, m)),
            Err(e) => Err(e),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

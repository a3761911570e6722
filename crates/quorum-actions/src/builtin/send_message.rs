// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::json;

use crate::{ActionContext, ActionError, ActionHandler, ActionOutcome, ActionRequest};

/// Delivers a message to another agent through the runtime.
pub struct SendMessageAction;

#[async_trait]
impl ActionHandler for SendMessageAction {
    fn name(&self) -> &str {
        "send_message"
    }

    fn capability_group(&self) -> &str {
        "agent"
    }

    async fn execute(
        &self,
        req: &ActionRequest,
        ctx: &ActionContext,
    ) -> Result<ActionOutcome, ActionError> {
        let to = req
            .params
            .get("to")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ActionError::InvalidParams("send_message requires 'to'".into()))?;
        let content = req
            .params
            .get("content")
            .cloned()
            .ok_or_else(|| ActionError::InvalidParams("send_message requires 'content'".into()))?;

        match ctx
            .ops
            .send_agent_message(&ctx.agent_id, to, content)
            .await
        {
            Ok(()) => Ok(ActionOutcome::ok(
                &req.action_id,
                json!({ "status": "sent", "to": to }),
            )),
            Err(ActionError::AgentNotFound(id)) => Ok(ActionOutcome::err(
                &req.action_id,
                format!("agent not found: {id}"),
            )),
            Err(e) => Err(e),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::{ActionRegistry, NoopRuntimeOps, StaticSecretStore};

    fn ctx() -> ActionContext {
        ActionContext {
            agent_id: "a1".into(),
            capability_groups: vec!["agent".into()],
            ops: Arc::new(NoopRuntimeOps),
            secrets: Arc::new(StaticSecretStore::new()),
            shell_threshold: Duration::from_millis(100),
            registry: Arc::new(ActionRegistry::new()),
        }
    }

    #[tokio::test]
    async fn sends_through_runtime_ops() {
        let req = ActionRequest::new(
            "id",
            "send_message",
            json!({"to": "a2", "content": "hello"}),
        );
        let out = SendMessageAction.execute(&req, &ctx()).await.unwrap();
        assert_eq!(out.content["status"], "sent");
    }

    #[tokio::test]
    async fn missing_to_is_invalid() {
        let req = ActionRequest::new("id", "send_message", json!({"content": "x"}));
        assert!(SendMessageAction.execute(&req, &ctx()).await.is_err());
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::json;

use crate::{
    ActionContext, ActionError, ActionHandler, ActionOutcome, ActionRequest, TodoItem, TodoState,
};

/// Replaces the agent's todo list. The new list travels back on the outcome
/// and the agent applies it during result integration, keeping todo state
/// mailbox-serialized.
pub struct TodoWriteAction;

#[async_trait]
impl ActionHandler for TodoWriteAction {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn capability_group(&self) -> &str {
        "agent"
    }

    async fn execute(
        &self,
        req: &ActionRequest,
        _ctx: &ActionContext,
    ) -> Result<ActionOutcome, ActionError> {
        let items = req
            .params
            .get("todos")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ActionError::InvalidParams("todo_write requires 'todos'".into()))?;

        let mut todos = Vec::with_capacity(items.len());
        for item in items {
            let content = item
                .get("content")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    ActionError::InvalidParams("every todo needs string 'content'".into())
                })?
                .to_string();
            let state = match item.get("state").and_then(|v| v.as_str()).unwrap_or("todo") {
                "todo" => TodoState::Todo,
                "pending" => TodoState::Pending,
                "done" => TodoState::Done,
                other => {
                    return Err(ActionError::InvalidParams(format!(
                        "unknown todo state: {other}"
                    )))
                }
            };
            todos.push(TodoItem { content, state });
        }

        let mut out = ActionOutcome::ok(
            &req.action_id,
            json!({ "status": "updated", "count": todos.len() }),
        );
        out.todo_update = Some(todos);
        Ok(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::shell_job::ShellJob;

/// One action invocation handed to a Router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action_id: String,
    /// Action type, e.g. "shell" or "file_read".
    pub action: String,
    pub params: Value,
}

impl ActionRequest {
    pub fn new(action_id: impl Into<String>, action: impl Into<String>, params: Value) -> Self {
        Self {
            action_id: action_id.into(),
            action: action.into(),
            params,
        }
    }
}

/// A structured todo item owned by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    pub state: TodoState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TodoState {
    Todo,
    Pending,
    Done,
}

/// The result of executing one action.
///
/// `content` is always JSON-safe so it can be stored in history and
/// broadcast to UIs. Side-band fields carry outcomes the owning agent
/// applies during result integration: a replacement todo list, a spawned
/// child id, a still-running shell job, or per-sub-action outcomes from a
/// batch.
#[derive(Debug)]
pub struct ActionOutcome {
    pub action_id: String,
    pub content: Value,
    pub is_error: bool,
    pub todo_update: Option<Vec<TodoItem>>,
    pub spawned_agent_id: Option<String>,
    pub shell_job: Option<ShellJob>,
    pub sub_outcomes: Vec<ActionOutcome>,
}

impl ActionOutcome {
    pub fn ok(action_id: impl Into<String>, content: Value) -> Self {
        Self {
            action_id: action_id.into(),
            content,
            is_error: false,
            todo_update: None,
            spawned_agent_id: None,
            shell_job: None,
            sub_outcomes: Vec::new(),
        }
    }

    pub fn err(action_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            content: serde_json::json!({ "error": message.into() }),
            is_error: true,
            todo_update: None,
            spawned_agent_id: None,
            shell_job: None,
            sub_outcomes: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("action not allowed: {action} requires capability group {group}")]
    ActionNotAllowed { action: String, group: String },

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("unknown secret: {0}")]
    UnknownSecret(String),

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

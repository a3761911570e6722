// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::{ActionError, ActionRegistry, SecretStore};

/// Telemetry emitted around every action execution.
#[derive(Debug, Clone)]
pub enum ActionTelemetry {
    Started {
        action_type: String,
        action_id: String,
    },
    Completed {
        action_type: String,
        action_id: String,
        is_error: bool,
        duration_ms: u64,
    },
}

/// Runtime operations an action handler may need but that live above this
/// crate: spawning agents, inter-agent messaging, telemetry fan-out. The
/// supervisor implements this; tests use [`NoopRuntimeOps`].
#[async_trait]
pub trait RuntimeOps: Send + Sync {
    /// Spawn a child agent from normalized spawn params; returns the child's
    /// agent id.
    async fn spawn_child(&self, parent_id: &str, params: Value) -> Result<String, ActionError>;

    /// Deliver a message to another agent and broadcast it on the message
    /// topics.
    async fn send_agent_message(
        &self,
        from: &str,
        to: &str,
        content: Value,
    ) -> Result<(), ActionError>;

    /// Publish action telemetry for UI observability.
    fn emit_action_event(&self, agent_id: &str, event: ActionTelemetry);
}

/// Inert implementation for handler unit tests.
#[derive(Default)]
pub struct NoopRuntimeOps;

#[async_trait]
impl RuntimeOps for NoopRuntimeOps {
    async fn spawn_child(&self, _parent_id: &str, _params: Value) -> Result<String, ActionError> {
        Ok("noop-child".to_string())
    }

    async fn send_agent_message(
        &self,
        _from: &str,
        _to: &str,
        _content: Value,
    ) -> Result<(), ActionError> {
        Ok(())
    }

    fn emit_action_event(&self, _agent_id: &str, _event: ActionTelemetry) {}
}

/// Everything a handler can see about the agent it acts for.
#[derive(Clone)]
pub struct ActionContext {
    pub agent_id: String,
    pub capability_groups: Vec<String>,
    pub ops: Arc<dyn RuntimeOps>,
    pub secrets: Arc<dyn SecretStore>,
    /// Shell commands finishing inside this window complete synchronously.
    pub shell_threshold: Duration,
    /// Back-reference for composite handlers (batch_sync) that dispatch
    /// sub-actions through the same capability and telemetry path.
    pub registry: Arc<ActionRegistry>,
}

impl ActionContext {
    pub fn allows(&self, group: &str) -> bool {
        self.capability_groups.iter().any(|g| g == group)
    }
}

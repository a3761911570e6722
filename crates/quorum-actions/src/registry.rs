// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::{ActionContext, ActionError, ActionOutcome, ActionRequest, ActionTelemetry};

/// One executable action type.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Capability group the owning agent must hold for this action to run.
    fn capability_group(&self) -> &str;

    async fn execute(
        &self,
        req: &ActionRequest,
        ctx: &ActionContext,
    ) -> Result<ActionOutcome, ActionError>;
}

/// Central registry of action handlers.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: impl ActionHandler + 'static) {
        self.handlers
            .insert(handler.name().to_string(), Arc::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Capability group for an action type, when the action is known.
    pub fn capability_group(&self, name: &str) -> Option<String> {
        self.handlers
            .get(name)
            .map(|h| h.capability_group().to_string())
    }

    /// The full dispatch path: lookup → capability check → start telemetry →
    /// execute → stop telemetry. Used by Routers for top-level actions and
    /// by `batch_sync` for each sub-action, so every execution is checked
    /// and observable the same way.
    pub async fn execute(
        &self,
        req: &ActionRequest,
        ctx: &ActionContext,
    ) -> Result<ActionOutcome, ActionError> {
        let handler = self
            .get(&req.action)
            .ok_or_else(|| ActionError::UnknownAction(req.action.clone()))?;

        let group = handler.capability_group();
        if !ctx.allows(group) {
            return Err(ActionError::ActionNotAllowed {
                action: req.action.clone(),
                group: group.to_string(),
            });
        }

        ctx.ops.emit_action_event(
            &ctx.agent_id,
            ActionTelemetry::Started {
                action_type: req.action.clone(),
                action_id: req.action_id.clone(),
            },
        );
        let started = Instant::now();

        let result = handler.execute(req, ctx).await;

        let (is_error, outcome) = match result {
            Ok(outcome) => (outcome.is_error, Ok(outcome)),
            Err(e) => (true, Err(e)),
        };
        ctx.ops.emit_action_event(
            &ctx.agent_id,
            ActionTelemetry::Completed {
                action_type: req.action.clone(),
                action_id: req.action_id.clone(),
                is_error,
                duration_ms: started.elapsed().as_millis() as u64,
            },
        );
        outcome
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

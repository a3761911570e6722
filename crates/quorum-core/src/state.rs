// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use quorum_actions::TodoItem;
use quorum_config::AgentConfig;

use crate::cost::CostAccumulator;
use crate::handle::{AgentHandle, MonitorRef};
use crate::history::ModelHistories;
use crate::router::RouterHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Initializing,
    Ready,
    Dismissing,
}

/// A dispatched action the agent is still waiting on.
///
/// `acked` pre-acknowledges asynchronous actions (long waits, shell, spawn)
/// so inbound messages keep flowing while they run; any un-acked entry makes
/// inbound messages queue instead.
#[derive(Debug, Clone)]
pub struct PendingAction {
    pub action_type: String,
    pub params: Value,
    pub inserted_at: DateTime<Utc>,
    pub acked: bool,
}

/// Serializable projection of a pending action for sync requests.
#[derive(Debug, Clone, Serialize)]
pub struct PendingActionInfo {
    pub action_id: String,
    pub action_type: String,
    pub acked: bool,
    pub inserted_at: DateTime<Utc>,
}

/// The single active wait timer. A fresh generation is minted for every
/// armed timer; wake-ups carrying an older generation are stale and dropped.
#[derive(Debug)]
pub struct WaitTimer {
    pub id: Uuid,
    pub generation: u64,
    /// Dropping this cancels the sleeping task.
    pub cancel: oneshot::Sender<()>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerInfo {
    pub id: Uuid,
    pub generation: u64,
}

/// One spawned child.
#[derive(Debug, Clone)]
pub struct Child {
    pub child_id: String,
    pub handle: AgentHandle,
    pub spawned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LessonType {
    Factual,
    Behavioral,
}

/// A distilled lesson produced by the reflector during condensation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    #[serde(rename = "type")]
    pub lesson_type: LessonType,
    pub content: String,
    pub confidence: f64,
}

/// The reflector's summary of where a model's conversation stands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub summary: String,
    pub updated_at: DateTime<Utc>,
}

/// A deferred inbound message, queued while an un-acked action is pending.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub from: String,
    pub content: Value,
    pub received_at: DateTime<Utc>,
}

/// Handle used to shut down an attached MCP client task.
#[derive(Debug)]
pub struct McpClient {
    pub monitor_ref: MonitorRef,
    pub shutdown: oneshot::Sender<()>,
}

/// The canonical record one agent actor owns and mutates. Only the actor
/// task touches it; everyone else goes through the mailbox.
pub struct AgentState {
    pub agent_id: String,
    pub config: AgentConfig,
    pub parent_handle: Option<AgentHandle>,
    pub children: Vec<Child>,
    pub status: AgentStatus,
    pub dismissing: bool,
    /// Resolved model pool (config pool, runtime pool, or the test default).
    pub model_pool: Vec<String>,
    pub model_histories: ModelHistories,
    pub pending_actions: HashMap<String, PendingAction>,
    pub active_routers: HashMap<MonitorRef, RouterHandle>,
    pub shell_routers: HashMap<String, RouterHandle>,
    pub wait_timer: Option<WaitTimer>,
    pub consensus_scheduled: bool,
    pub queued_messages: Vec<QueuedMessage>,
    pub action_counter: u64,
    pub timer_generation: u64,
    pub context_lessons: HashMap<String, Vec<Lesson>>,
    pub model_states: HashMap<String, ModelState>,
    pub todos: Vec<TodoItem>,
    pub mcp_client: Option<McpClient>,
    pub cost_accumulator: CostAccumulator,
    /// Running total of every cost flushed so far; feeds the budget
    /// injector.
    pub total_cost_usd: f64,
    pub context_limits: HashMap<String, u32>,
    pub context_limits_loaded: bool,
}

impl AgentState {
    pub fn new(config: AgentConfig, parent_handle: Option<AgentHandle>, pool: Vec<String>) -> Self {
        let model_histories: ModelHistories =
            pool.iter().map(|id| (id.clone(), Vec::new())).collect();
        Self {
            agent_id: config.agent_id.clone(),
            cost_accumulator: CostAccumulator::new(&config.agent_id, &config.task_id),
            config,
            parent_handle,
            children: Vec::new(),
            status: AgentStatus::Initializing,
            dismissing: false,
            model_pool: pool,
            model_histories,
            pending_actions: HashMap::new(),
            active_routers: HashMap::new(),
            shell_routers: HashMap::new(),
            wait_timer: None,
            consensus_scheduled: false,
            queued_messages: Vec::new(),
            action_counter: 0,
            timer_generation: 0,
            context_lessons: HashMap::new(),
            model_states: HashMap::new(),
            todos: Vec::new(),
            mcp_client: None,
            total_cost_usd: 0.0,
            context_limits: HashMap::new(),
            context_limits_loaded: false,
        }
    }

    /// True when some pending action has not been pre-acknowledged — the
    /// condition that makes inbound messages queue.
    pub fn has_unacked_pending(&self) -> bool {
        self.pending_actions.values().any(|p| !p.acked)
    }

    pub fn pending_infos(&self) -> Vec<PendingActionInfo> {
        let mut infos: Vec<PendingActionInfo> = self
            .pending_actions
            .iter()
            .map(|(id, p)| PendingActionInfo {
                action_id: id.clone(),
                action_type: p.action_type.clone(),
                acked: p.acked,
                inserted_at: p.inserted_at,
            })
            .collect();
        infos.sort_by(|a, b| a.inserted_at.cmp(&b.inserted_at));
        infos
    }

    pub fn timer_info(&self) -> Option<TimerInfo> {
        self.wait_timer.as_ref().map(|t| TimerInfo {
            id: t.id,
            generation: t.generation,
        })
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            agent_id: self.agent_id.clone(),
            status: self.status,
            dismissing: self.dismissing,
            model_pool: self.model_pool.clone(),
            children: self.children.iter().map(|c| c.child_id.clone()).collect(),
            todos: self.todos.clone(),
            pending_actions: self.pending_infos(),
            queued_messages: self.queued_messages.len(),
            consensus_scheduled: self.consensus_scheduled,
            wait_timer: self.timer_info(),
            action_counter: self.action_counter,
        }
    }

    /// The persisted state map written after every consensus cycle.
    pub fn persistable_state(&self) -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert(
            "model_histories".to_string(),
            serde_json::to_value(&self.model_histories).unwrap_or(Value::Null),
        );
        map.insert(
            "context_lessons".to_string(),
            serde_json::to_value(&self.context_lessons).unwrap_or(Value::Null),
        );
        map.insert(
            "model_states".to_string(),
            serde_json::to_value(&self.model_states).unwrap_or(Value::Null),
        );
        map.insert(
            "todos".to_string(),
            serde_json::to_value(&self.todos).unwrap_or(Value::Null),
        );
        map
    }
}

/// Read-only view returned by `get_state`.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub agent_id: String,
    pub status: AgentStatus,
    pub dismissing: bool,
    pub model_pool: Vec<String>,
    pub children: Vec<String>,
    pub todos: Vec<TodoItem>,
    pub pending_actions: Vec<PendingActionInfo>,
    pub queued_messages: usize,
    pub consensus_scheduled: bool,
    pub wait_timer: Option<TimerInfo>,
    pub action_counter: u64,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

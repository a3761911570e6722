// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The agent actor: a single task owning one [`AgentState`], serializing
//! every interaction through its mailbox.
//!
//! The actor's contract, in mailbox order:
//! - inbound messages append history and schedule consensus, unless an
//!   un-acked pending action forces them to queue;
//! - action results are inserted into history *before* the self-sent
//!   `trigger_consensus`, so a result is always visible to the cycle that
//!   follows it;
//! - `trigger_consensus` without an active schedule or timer is stale and
//!   dropped without touching state;
//! - wait timers carry a generation, and only the live generation counts.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use quorum_actions::{ActionContext, ActionOutcome, ActionRequest, RuntimeOps, TodoState};
use quorum_config::AgentConfig;
use quorum_model::DEFAULT_MODEL_ID;
use quorum_store::AgentRecord;

use crate::consensus::{self, ActionResponse, WaitDirective};
use crate::env::Env;
use crate::events::{topics, Event};
use crate::format;
use crate::handle::{AgentHandle, AgentMsg, AgentReply, AgentRequest, MonitorRef};
use crate::history::{self, EntryType};
use crate::image::{self, Detected};
use crate::registry::AgentMeta;
use crate::router::{spawn_router, RouterHandle};
use crate::state::{AgentState, AgentStatus, Child, PendingAction, QueuedMessage, WaitTimer};
use crate::supervisor::Supervisor;
use crate::CoreError;

/// Pending actions for these types are pre-acknowledged: their results
/// depend on the outside world, so inbound messages must keep flowing
/// while they run.
const ASYNC_ACTIONS: &[&str] = &["spawn_agent", "shell"];

pub(crate) struct AgentActor {
    state: AgentState,
    env: Env,
    ops: Arc<dyn RuntimeOps>,
    handle: AgentHandle,
    rx: mpsc::UnboundedReceiver<AgentMsg>,
    /// Messages popped during a post-cycle drain, replayed before the
    /// mailbox is polled again so FIFO order is preserved.
    stash: VecDeque<AgentMsg>,
    terminated: bool,
}

impl AgentActor {
    /// Validate config, register atomically, and start the actor task.
    pub(crate) fn spawn(
        config: AgentConfig,
        env: Env,
        supervisor: Supervisor,
        snapshot: Option<AgentRecord>,
    ) -> Result<(AgentHandle, tokio::task::JoinHandle<()>), CoreError> {
        if config.agent_id.trim().is_empty() {
            return Err(CoreError::InvalidConfig("agent_id is required".into()));
        }

        let (handle, rx) = AgentHandle::channel();
        let parent_handle = config
            .parent_id
            .as_deref()
            .and_then(|pid| env.registry.lookup(pid))
            .map(|entry| entry.handle);

        env.registry.insert(
            &config.agent_id,
            handle.clone(),
            AgentMeta {
                task_id: config.task_id.clone(),
                parent_handle: parent_handle.clone(),
                spawned_at: Utc::now(),
            },
        )?;

        let pool = config
            .model_pool
            .clone()
            .or_else(|| env.config.runtime.model_pool.clone())
            .unwrap_or_else(|| vec![DEFAULT_MODEL_ID.to_string()]);

        let mut state = AgentState::new(config, parent_handle, pool);
        if let Some(record) = snapshot {
            restore_state(&mut state, &record);
        }

        let ops: Arc<dyn RuntimeOps> = Arc::new(supervisor);
        let actor = AgentActor {
            state,
            env,
            ops,
            handle: handle.clone(),
            rx,
            stash: VecDeque::new(),
            terminated: false,
        };
        let join = tokio::spawn(actor.run());
        Ok((handle, join))
    }

    async fn run(mut self) {
        self.init().await;
        loop {
            let msg = match self.stash.pop_front() {
                Some(msg) => msg,
                None => match self.rx.recv().await {
                    Some(msg) => msg,
                    None => break,
                },
            };
            if self.handle_msg(msg).await {
                break;
            }
        }
        self.terminate().await;
    }

    async fn init(&mut self) {
        let config = &self.state.config;

        // The initial profile prompt seeds every model's history; restored
        // agents already carry theirs.
        if self.state.model_histories.values().all(|h| h.is_empty()) {
            if let Some(desc) = &config.profile_description {
                history::add_history_entry(
                    &mut self.state.model_histories,
                    EntryType::Prompt,
                    json!(desc),
                );
            }
        }

        let parent_id = self
            .state
            .parent_handle
            .as_ref()
            .and_then(|h| self.env.registry.agent_id_for(h))
            .or_else(|| config.parent_id.clone());

        if config.persist && !config.restoration_mode {
            let record = AgentRecord {
                agent_id: self.state.agent_id.clone(),
                task_id: config.task_id.clone(),
                parent_id: parent_id.clone(),
                status: "ready".into(),
                config: serde_json::to_value(config).unwrap_or(Value::Null),
                state: Default::default(),
                inserted_at: Utc::now(),
            };
            if let Err(e) = self.env.agent_store.put_agent(record).await {
                warn!(agent_id = %self.state.agent_id, "agent row write failed: {e}");
            }
        }

        self.env.bus.publish(
            topics::LIFECYCLE,
            Event::AgentSpawned {
                agent_id: self.state.agent_id.clone(),
                task_id: config.task_id.clone(),
                parent_id,
            },
        );

        // Parent death is the one external event that tears this agent down.
        if let Some(parent) = self.state.parent_handle.clone() {
            let me = self.handle.clone();
            tokio::spawn(async move {
                parent.closed().await;
                me.send(AgentMsg::ParentDown);
            });
        }

        self.state.status = AgentStatus::Ready;
        info!(agent_id = %self.state.agent_id, "agent ready");
    }

    /// Returns `true` when the actor should stop.
    async fn handle_msg(&mut self, msg: AgentMsg) -> bool {
        match msg {
            AgentMsg::AgentMessage { from, content } => {
                self.handle_inbound_message(from, content);
            }
            AgentMsg::UserMessage { content } => {
                self.handle_inbound_message("parent".to_string(), content);
            }
            AgentMsg::ActionResult { outcome } => {
                self.handle_action_result(outcome);
            }
            AgentMsg::ShellRunning {
                command_id,
                monitor_ref,
            } => {
                if let Some(router) = self.state.active_routers.get(&monitor_ref) {
                    self.state.shell_routers.insert(command_id, router.clone());
                }
            }
            AgentMsg::SystemEvent { name, payload } => {
                self.cancel_timer();
                let formatted = format::format_system_event(&name, &payload);
                history::add_history_entry(
                    &mut self.state.model_histories,
                    EntryType::Event,
                    json!(formatted),
                );
                self.schedule_consensus();
            }
            AgentMsg::RouterDown {
                monitor_ref,
                reason,
            } => {
                self.handle_router_down(monitor_ref, &reason);
            }
            AgentMsg::ParentDown => {
                info!(agent_id = %self.state.agent_id, "parent down; shutting down");
                return true;
            }
            AgentMsg::TriggerConsensus => {
                self.handle_trigger_consensus().await;
            }
            AgentMsg::WaitExpired { id, generation } => {
                self.handle_wait_expired(id, generation);
            }
            AgentMsg::MarkFirstTodoDone => {
                if let Some(todo) = self
                    .state
                    .todos
                    .iter_mut()
                    .find(|t| t.state != TodoState::Done)
                {
                    todo.state = TodoState::Done;
                }
            }
            AgentMsg::Request { request, reply } => {
                let response = self.handle_request(request).await;
                let _ = reply.send(response);
            }
            AgentMsg::Stop { reply } => {
                self.terminate().await;
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
                return true;
            }
        }
        false
    }

    // ─── Inbound messages ────────────────────────────────────────────────────

    fn handle_inbound_message(&mut self, from: String, content: Value) {
        if self.state.has_unacked_pending() {
            debug!(agent_id = %self.state.agent_id, %from, "un-acked action pending; queueing message");
            self.state.queued_messages.push(QueuedMessage {
                from,
                content,
                received_at: Utc::now(),
            });
            return;
        }
        self.cancel_timer();
        self.append_message_event(&from, &content);
        self.schedule_consensus();
    }

    fn append_message_event(&mut self, from: &str, content: &Value) {
        let formatted = format::format_agent_message(from, content);
        history::add_history_entry(
            &mut self.state.model_histories,
            EntryType::Event,
            json!(formatted),
        );
    }

    // ─── Action results ──────────────────────────────────────────────────────

    fn handle_action_result(&mut self, outcome: ActionOutcome) {
        let action_id = outcome.action_id.clone();
        let action_type = self
            .state
            .pending_actions
            .remove(&action_id)
            .map(|p| p.action_type)
            .unwrap_or_else(|| "unknown".to_string());

        self.integrate_outcome(outcome, &action_type);

        // Queued inbound messages flush only after the result entry exists,
        // so a child's first reply can never precede its spawn result in
        // history.
        if !self.state.has_unacked_pending() && !self.state.queued_messages.is_empty() {
            let queued = std::mem::take(&mut self.state.queued_messages);
            for m in queued {
                self.append_message_event(&m.from, &m.content);
            }
        }

        self.schedule_consensus();
    }

    fn integrate_outcome(&mut self, mut outcome: ActionOutcome, action_type: &str) {
        if !outcome.sub_outcomes.is_empty() {
            for sub in std::mem::take(&mut outcome.sub_outcomes) {
                self.integrate_outcome(sub, action_type);
            }
            return;
        }

        match image::detect(&outcome.content) {
            Detected::Image { .. } => {
                history::add_history_entry_with_action(
                    &mut self.state.model_histories,
                    EntryType::Image,
                    outcome.content.clone(),
                    &outcome.action_id,
                    outcome.content.clone(),
                    action_type,
                );
            }
            Detected::Text => {
                let formatted =
                    format::format_action_result(&outcome.action_id, action_type, &outcome.content);
                history::add_history_entry_with_action(
                    &mut self.state.model_histories,
                    EntryType::Result,
                    json!(formatted),
                    &outcome.action_id,
                    outcome.content.clone(),
                    action_type,
                );
            }
        }

        if let Some(todos) = outcome.todo_update.take() {
            self.state.todos = todos;
        }
        if let Some(child_id) = outcome.spawned_agent_id.take() {
            if let Some(entry) = self.env.registry.lookup(&child_id) {
                self.state.children.push(Child {
                    child_id,
                    handle: entry.handle,
                    spawned_at: Utc::now(),
                });
            }
        }
    }

    fn handle_router_down(&mut self, monitor_ref: MonitorRef, reason: &str) {
        if reason != "normal" {
            warn!(agent_id = %self.state.agent_id, %reason, "router died abnormally");
        }
        if let Some(removed) = self.state.active_routers.remove(&monitor_ref) {
            self.state.shell_routers.retain(|_, h| h != &removed);
        }
    }

    // ─── Consensus ───────────────────────────────────────────────────────────

    fn schedule_consensus(&mut self) {
        if !self.state.consensus_scheduled {
            self.state.consensus_scheduled = true;
            self.handle.send(AgentMsg::TriggerConsensus);
        }
    }

    async fn handle_trigger_consensus(&mut self) {
        // Staleness check: a trigger without an active schedule or timer is
        // a leftover; drop it without mutating anything.
        if !self.state.consensus_scheduled && self.state.wait_timer.is_none() {
            debug!(agent_id = %self.state.agent_id, "stale trigger_consensus dropped");
            return;
        }
        self.state.consensus_scheduled = false;
        self.cancel_timer();

        match consensus::run_cycle(&mut self.state, &self.env).await {
            Ok(outcome) => {
                debug!(
                    agent_id = %self.state.agent_id,
                    decision = %outcome.action.action,
                    decision_type = ?outcome.decision_type,
                    rounds = outcome.round_count,
                    "consensus reached"
                );
                self.state.total_cost_usd += outcome.accumulator.total_usd();
                let _ = outcome.accumulator.flush(&self.env).await;
                self.dispatch_decision(outcome.action);
            }
            Err(failure) => {
                warn!(agent_id = %self.state.agent_id, "consensus failed: {}", failure.error);
                self.state.total_cost_usd += failure.accumulator.total_usd();
                let _ = failure.accumulator.flush(&self.env).await;
            }
        }

        self.persist_state().await;
        self.drain_stale_triggers();
    }

    /// After a valid cycle, remove every `trigger_consensus` already sitting
    /// in the mailbox; other messages are kept in order. A schedule set in
    /// the meantime gets its trigger re-sent so it cannot be lost to the
    /// drain.
    fn drain_stale_triggers(&mut self) {
        let mut dropped = 0u32;
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                AgentMsg::TriggerConsensus => dropped += 1,
                other => self.stash.push_back(other),
            }
        }
        if dropped > 0 {
            debug!(agent_id = %self.state.agent_id, dropped, "drained trigger_consensus backlog");
        }
        if self.state.consensus_scheduled {
            self.handle.send(AgentMsg::TriggerConsensus);
        }
    }

    // ─── Dispatch ────────────────────────────────────────────────────────────

    fn dispatch_decision(&mut self, decision: ActionResponse) {
        history::add_history_entry(
            &mut self.state.model_histories,
            EntryType::Decision,
            serde_json::to_value(&decision).unwrap_or(Value::Null),
        );

        // `wait` is not an outside-world action: the agent pauses until a
        // timer or an external message wakes it. The timer lives on the
        // agent, never on a Router, which would be dead by expiry.
        if decision.action == "wait" {
            match decision.wait {
                WaitDirective::Ms(ms) => self.arm_timer(Duration::from_millis(ms)),
                _ => {
                    if let Some(ms) = decision.params.get("duration_ms").and_then(|v| v.as_u64()) {
                        self.arm_timer(Duration::from_millis(ms));
                    }
                }
            }
            return;
        }

        if self.state.dismissing {
            info!(agent_id = %self.state.agent_id, action = %decision.action,
                  "dismissing; refusing new action dispatch");
            return;
        }

        // Permission denial is synchronous and side-effect free.
        if let Some(group) = self.env.actions.capability_group(&decision.action) {
            if !self.state.config.capability_groups.contains(&group) {
                warn!(agent_id = %self.state.agent_id, action = %decision.action,
                      %group, "action not allowed");
                return;
            }
        }

        self.state.action_counter += 1;
        let action_id = format!("act-{}-{}", self.state.action_counter, short_id());

        let acked = matches!(decision.wait, WaitDirective::Indefinite)
            || matches!(decision.wait, WaitDirective::Ms(ms)
                if ms > self.env.config.runtime.consensus.wait_threshold_ms)
            || ASYNC_ACTIONS.contains(&decision.action.as_str());

        self.state.pending_actions.insert(
            action_id.clone(),
            PendingAction {
                action_type: decision.action.clone(),
                params: decision.params.clone(),
                inserted_at: Utc::now(),
                acked,
            },
        );

        if let WaitDirective::Ms(ms) = decision.wait {
            self.arm_timer(Duration::from_millis(ms));
        }

        let request = ActionRequest::new(action_id, decision.action.clone(), decision.params);
        let spawn = spawn_router(
            self.handle.clone(),
            self.action_context(),
            request,
            decision.auto_complete_todo,
        );
        self.state
            .active_routers
            .insert(spawn.monitor_ref, spawn.handle);
    }

    fn action_context(&self) -> ActionContext {
        ActionContext {
            agent_id: self.state.agent_id.clone(),
            capability_groups: self.state.config.capability_groups.clone(),
            ops: Arc::clone(&self.ops),
            secrets: Arc::clone(&self.env.secrets),
            shell_threshold: Duration::from_millis(
                self.env.config.runtime.shell_smart_threshold_ms,
            ),
            registry: Arc::clone(&self.env.actions),
        }
    }

    // ─── Timers ──────────────────────────────────────────────────────────────

    fn arm_timer(&mut self, duration: Duration) {
        self.cancel_timer();
        self.state.timer_generation += 1;
        let generation = self.state.timer_generation;
        let id = Uuid::new_v4();
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let me = self.handle.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    me.send(AgentMsg::WaitExpired { id, generation });
                }
                _ = cancel_rx => {}
            }
        });
        self.state.wait_timer = Some(WaitTimer {
            id,
            generation,
            cancel: cancel_tx,
        });
        debug!(agent_id = %self.state.agent_id, generation, ?duration, "wait timer armed");
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.state.wait_timer.take() {
            let _ = timer.cancel.send(());
        }
    }

    fn handle_wait_expired(&mut self, id: Uuid, generation: u64) {
        let is_current = self
            .state
            .wait_timer
            .as_ref()
            .map(|t| t.id == id && t.generation == generation)
            .unwrap_or(false);
        if !is_current {
            debug!(agent_id = %self.state.agent_id, generation, "stale wait timer ignored");
            return;
        }
        history::add_history_entry(
            &mut self.state.model_histories,
            EntryType::Event,
            json!(format::format_timeout(&id.to_string())),
        );
        // The still-armed timer validates the trigger; the cycle clears it.
        self.handle.send(AgentMsg::TriggerConsensus);
    }

    // ─── Synchronous requests ────────────────────────────────────────────────

    async fn handle_request(&mut self, request: AgentRequest) -> AgentReply {
        match request {
            AgentRequest::GetState => AgentReply::State(Box::new(self.state.snapshot())),
            AgentRequest::GetModelHistories => {
                AgentReply::Histories(self.state.model_histories.clone())
            }
            AgentRequest::GetPendingActions => AgentReply::Pending(self.state.pending_infos()),
            AgentRequest::GetWaitTimer => AgentReply::Timer(self.state.timer_info()),
            AgentRequest::SetDismissing(value) => {
                self.state.dismissing = value;
                if value {
                    self.state.status = AgentStatus::Dismissing;
                }
                AgentReply::Done
            }
            AgentRequest::IsDismissing => AgentReply::Flag(self.state.dismissing),
            AgentRequest::AddPendingAction {
                action_id,
                action_type,
                params,
                acked,
            } => {
                self.state.pending_actions.insert(
                    action_id,
                    PendingAction {
                        action_type,
                        params,
                        inserted_at: Utc::now(),
                        acked,
                    },
                );
                AgentReply::Done
            }
            AgentRequest::ProcessAction(decision) => {
                if let Some(group) = self.env.actions.capability_group(&decision.action) {
                    if !self.state.config.capability_groups.contains(&group) {
                        return AgentReply::Error("action_not_allowed".into());
                    }
                }
                self.dispatch_decision(decision);
                AgentReply::Done
            }
            AgentRequest::ShellStatus { command_id } => {
                match self.state.shell_routers.get(&command_id) {
                    Some(router) => match router.shell_status().await {
                        Some(status) => AgentReply::Shell(status),
                        None => AgentReply::Error("command_not_found".into()),
                    },
                    None => AgentReply::Error("command_not_found".into()),
                }
            }
            AgentRequest::ShellTerminate { command_id } => {
                match self.state.shell_routers.remove(&command_id) {
                    Some(router) => match router.shell_terminate().await {
                        Some(report) => AgentReply::Shell(report),
                        None => AgentReply::Error("command_not_found".into()),
                    },
                    None => AgentReply::Error("command_not_found".into()),
                }
            }
        }
    }

    // ─── Persistence & teardown ──────────────────────────────────────────────

    async fn persist_state(&self) {
        let config = &self.state.config;
        if !config.persist || config.restoration_mode {
            return;
        }
        if let Err(e) = self
            .env
            .agent_store
            .update_agent_state(&self.state.agent_id, self.state.persistable_state())
            .await
        {
            warn!(agent_id = %self.state.agent_id, "state persistence failed: {e}");
        }
    }

    async fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.state.dismissing = true;
        self.state.status = AgentStatus::Dismissing;

        // Routers get an unbounded deadline so in-flight deliveries and
        // store writes can finish.
        let routers: Vec<RouterHandle> = self.state.active_routers.drain().map(|(_, h)| h).collect();
        for router in routers {
            router.stop().await;
        }
        self.state.shell_routers.clear();

        if let Some(mcp) = self.state.mcp_client.take() {
            let _ = mcp.shutdown.send(());
        }

        let children: Vec<Child> = self.state.children.drain(..).collect();
        for child in children {
            child.handle.stop().await;
        }

        self.env.registry.remove(&self.state.agent_id);
        self.env.bus.publish(
            topics::LIFECYCLE,
            Event::AgentTerminated {
                agent_id: self.state.agent_id.clone(),
            },
        );
        info!(agent_id = %self.state.agent_id, "agent terminated");
    }
}

fn short_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

fn restore_state(state: &mut AgentState, record: &AgentRecord) {
    if let Some(histories) = record.state.get("model_histories") {
        if let Ok(parsed) = serde_json::from_value::<history::ModelHistories>(histories.clone()) {
            state.model_histories = align_histories(parsed, &state.model_pool);
        }
    }
    if let Some(lessons) = record.state.get("context_lessons") {
        if let Ok(parsed) = serde_json::from_value(lessons.clone()) {
            state.context_lessons = parsed;
        }
    }
    if let Some(model_states) = record.state.get("model_states") {
        if let Ok(parsed) = serde_json::from_value(model_states.clone()) {
            state.model_states = parsed;
        }
    }
    if let Some(todos) = record.state.get("todos") {
        if let Ok(parsed) = serde_json::from_value(todos.clone()) {
            state.todos = parsed;
        }
    }
}

/// A snapshot may have been written under a different model pool than the
/// one the agent is restored with. Every history key must stay a member of
/// the current pool, so mismatched snapshots are rekeyed: the longest
/// persisted history (ties broken by key order) becomes the shared base for
/// every model in the new pool.
fn align_histories(
    persisted: history::ModelHistories,
    pool: &[String],
) -> history::ModelHistories {
    let keys_match =
        persisted.len() == pool.len() && pool.iter().all(|m| persisted.contains_key(m));
    if keys_match {
        return persisted;
    }
    let base = persisted
        .iter()
        .max_by(|a, b| a.1.len().cmp(&b.1.len()).then_with(|| b.0.cmp(a.0)))
        .map(|(_, h)| h.clone())
        .unwrap_or_default();
    history::rekey_model_histories(pool, &base)
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Dynamic one-for-one supervisor for agent actors.
//!
//! Agents are independent, so a failure restarts only the failed agent.
//! Restart intensity is bounded: more than `max_restarts` restarts within
//! `restart_window_secs` marks the supervisor failed, and it refuses any
//! further starts — a persistent crash loop must surface, not spin.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, warn};
use uuid::Uuid;

use quorum_actions::{ActionError, ActionTelemetry, RuntimeOps};
use quorum_config::AgentConfig;
use quorum_store::AgentRecord;

use crate::agent::AgentActor;
use crate::env::Env;
use crate::events::{topics, Event};
use crate::handle::{AgentHandle, AgentMsg};
use crate::CoreError;

#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    env: Env,
    restarts: Mutex<VecDeque<Instant>>,
    failed: AtomicBool,
}

impl Supervisor {
    pub fn new(env: Env) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                env,
                restarts: Mutex::new(VecDeque::new()),
                failed: AtomicBool::new(false),
            }),
        }
    }

    pub fn env(&self) -> &Env {
        &self.inner.env
    }

    /// Start a fresh agent from its normalized config.
    pub fn start_agent(&self, config: AgentConfig) -> Result<AgentHandle, CoreError> {
        self.start_internal(config, None)
    }

    /// Start an agent from a persisted snapshot. Restoration mode is forced
    /// on, so the restored agent performs no persistence writes of its own.
    pub fn restore_agent(
        &self,
        mut config: AgentConfig,
        snapshot: AgentRecord,
    ) -> Result<AgentHandle, CoreError> {
        config.restoration_mode = true;
        self.start_internal(config, Some(snapshot))
    }

    fn start_internal(
        &self,
        config: AgentConfig,
        snapshot: Option<AgentRecord>,
    ) -> Result<AgentHandle, CoreError> {
        if self.inner.failed.load(Ordering::SeqCst) {
            return Err(CoreError::RestartIntensityExceeded);
        }

        let (handle, join) =
            AgentActor::spawn(config.clone(), self.inner.env.clone(), self.clone(), snapshot)?;

        // One-for-one monitoring: an aborted task (panic) gets its registry
        // entry cleared and a restart, subject to the intensity budget.
        // Normal exits cleaned up after themselves already.
        let supervisor = self.clone();
        tokio::spawn(async move {
            if let Err(e) = join.await {
                warn!(agent_id = %config.agent_id, "agent task died: {e}");
                supervisor.inner.env.registry.remove(&config.agent_id);
                supervisor.inner.env.bus.publish(
                    topics::LIFECYCLE,
                    Event::AgentTerminated {
                        agent_id: config.agent_id.clone(),
                    },
                );
                if supervisor.allow_restart() {
                    debug!(agent_id = %config.agent_id, "restarting agent");
                    if let Err(err) = supervisor.start_internal(config, None) {
                        warn!("agent restart failed: {err}");
                    }
                } else {
                    error!("supervisor restart intensity exceeded; no further restarts");
                }
            }
        });

        Ok(handle)
    }

    /// Stop an agent and wait for its teardown. The deadline is unbounded
    /// so in-flight router and store work can finish.
    pub async fn terminate_agent(&self, agent_id: &str) -> Result<(), CoreError> {
        let entry = self
            .inner
            .env
            .registry
            .lookup(agent_id)
            .ok_or_else(|| CoreError::NotFound(agent_id.to_string()))?;
        entry.handle.stop().await;
        Ok(())
    }

    pub fn list(&self) -> Vec<String> {
        self.inner.env.registry.list()
    }

    pub fn is_failed(&self) -> bool {
        self.inner.failed.load(Ordering::SeqCst)
    }

    fn allow_restart(&self) -> bool {
        if self.inner.failed.load(Ordering::SeqCst) {
            return false;
        }
        let window = Duration::from_secs(self.inner.env.config.runtime.restart_window_secs);
        let max = self.inner.env.config.runtime.max_restarts as usize;
        let mut times = self
            .inner
            .restarts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        while let Some(front) = times.front() {
            if now.duration_since(*front) >= window {
                times.pop_front();
            } else {
                break;
            }
        }
        if times.len() >= max {
            self.inner.failed.store(true, Ordering::SeqCst);
            return false;
        }
        times.push_back(now);
        true
    }
}

/// The supervisor is the runtime surface action handlers reach through:
/// spawning children, inter-agent messaging, and action telemetry fan-out.
#[async_trait]
impl RuntimeOps for Supervisor {
    async fn spawn_child(&self, parent_id: &str, params: Value) -> Result<String, ActionError> {
        let parent = self
            .inner
            .env
            .registry
            .lookup(parent_id)
            .ok_or_else(|| ActionError::AgentNotFound(parent_id.to_string()))?;

        let agent_id = params
            .get("agent_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("agent-{}", &Uuid::new_v4().to_string()[..8]));
        let task_id = params
            .get("task_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or(parent.meta.task_id);

        let mut config = AgentConfig {
            agent_id: agent_id.clone(),
            task_id,
            parent_id: Some(parent_id.to_string()),
            ..AgentConfig::default()
        };
        config.profile_name = params
            .get("profile_name")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        config.profile_description = params
            .get("profile_description")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        if let Some(pool) = params.get("model_pool").and_then(|v| v.as_array()) {
            config.model_pool = Some(
                pool.iter()
                    .filter_map(|m| m.as_str().map(str::to_string))
                    .collect(),
            );
        }
        if let Some(groups) = params.get("capability_groups").and_then(|v| v.as_array()) {
            config.capability_groups = groups
                .iter()
                .filter_map(|g| g.as_str().map(str::to_string))
                .collect();
        }
        if let Some(skills) = params.get("skills").and_then(|v| v.as_array()) {
            config.skills = skills
                .iter()
                .filter_map(|s| s.as_str().map(str::to_string))
                .collect();
        }
        config.test_mode = params
            .get("test_mode")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        config.persist = params
            .get("persist")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        self.start_agent(config)
            .map(|_| agent_id)
            .map_err(|e| ActionError::InvalidParams(e.to_string()))
    }

    async fn send_agent_message(
        &self,
        from: &str,
        to: &str,
        content: Value,
    ) -> Result<(), ActionError> {
        let entry = self
            .inner
            .env
            .registry
            .lookup(to)
            .ok_or_else(|| ActionError::AgentNotFound(to.to_string()))?;
        entry.handle.send(AgentMsg::AgentMessage {
            from: from.to_string(),
            content: content.clone(),
        });

        let thread = content
            .get("thread")
            .and_then(|t| t.as_str())
            .map(str::to_string);
        let event = Event::AgentMessage {
            from: from.to_string(),
            to: to.to_string(),
            content,
            thread: thread.clone(),
        };
        let bus = &self.inner.env.bus;
        bus.publish(&topics::messages(to), event.clone());
        bus.publish(topics::MESSAGES_ALL, event.clone());
        bus.publish(&topics::agent_messages(to), event.clone());
        if let Some(thread) = thread {
            bus.publish(&topics::thread(&thread), event);
        }
        Ok(())
    }

    fn emit_action_event(&self, _agent_id: &str, event: ActionTelemetry) {
        let bus_event = match event {
            ActionTelemetry::Started { action_type, .. } => Event::ActionStarted { action_type },
            ActionTelemetry::Completed {
                action_type,
                action_id,
                is_error,
                duration_ms,
            } => Event::ActionCompleted {
                action_type,
                action_id,
                is_error,
                duration_ms,
            },
        };
        self.inner.env.bus.publish(topics::ACTIONS, bus_event);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The per-action Router: an ephemeral worker that executes exactly one
//! action for exactly one agent, delivers the result back through the
//! agent's mailbox, and dies with a clean reason.
//!
//! Routers are monitored — a watcher task posts `RouterDown` to the owning
//! agent whatever way the worker ends. A Router owns at most one shell job;
//! status and termination requests for that command id are routed here via
//! the agent's `shell_routers` map.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use quorum_actions::{resolve_placeholders, ActionContext, ActionOutcome, ActionRequest, ShellJob};

use crate::handle::{AgentHandle, AgentMsg, MonitorRef};

/// How often a Router holding a live shell job checks for its completion.
const SHELL_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub enum RouterMsg {
    ShellStatus { reply: oneshot::Sender<Value> },
    ShellTerminate { reply: oneshot::Sender<Value> },
    Stop { reply: oneshot::Sender<()> },
}

/// Address of a live Router. Cloneable; equality is by worker identity.
#[derive(Debug, Clone)]
pub struct RouterHandle {
    router_id: Uuid,
    tx: mpsc::UnboundedSender<RouterMsg>,
}

impl PartialEq for RouterHandle {
    fn eq(&self, other: &Self) -> bool {
        self.router_id == other.router_id
    }
}
impl Eq for RouterHandle {}

impl RouterHandle {
    /// Forward a shell status query. `None` when the Router is gone.
    pub async fn shell_status(&self) -> Option<Value> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(RouterMsg::ShellStatus { reply: tx }).ok()?;
        rx.await.ok()
    }

    /// Forward a shell termination request. `None` when the Router is gone.
    pub async fn shell_terminate(&self) -> Option<Value> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(RouterMsg::ShellTerminate { reply: tx }).ok()?;
        rx.await.ok()
    }

    /// Ask the Router to stop and wait for it to wind down. The deadline is
    /// unbounded on purpose: a Router mid-delivery may be writing through
    /// stores, and cutting it off would lose the action result.
    pub async fn stop(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(RouterMsg::Stop { reply: tx }).is_ok() {
            // Err here means the Router exited without servicing the stop —
            // which is exactly as dead as a replied stop.
            let _ = rx.await;
        }
    }
}

pub struct RouterSpawn {
    pub handle: RouterHandle,
    pub monitor_ref: MonitorRef,
}

/// Start a Router for one action. Returns immediately; the result arrives
/// later as an `ActionResult` mailbox message, and `RouterDown` follows
/// when the worker is gone.
pub fn spawn_router(
    agent: AgentHandle,
    ctx: ActionContext,
    request: ActionRequest,
    auto_complete_todo: bool,
) -> RouterSpawn {
    let (tx, rx) = mpsc::unbounded_channel();
    let monitor_ref = Uuid::new_v4();
    let handle = RouterHandle {
        router_id: Uuid::new_v4(),
        tx,
    };

    let span = info_span!(
        "action.execute",
        action = %request.action,
        action_id = %request.action_id,
        agent_id = %ctx.agent_id,
    );
    let worker_agent = agent.clone();
    let worker = tokio::spawn(
        run_router(worker_agent, ctx, request, auto_complete_todo, rx, monitor_ref)
            .instrument(span),
    );

    // The watcher outlives the worker and reports however it ended, so the
    // agent's tracking maps never leak a dead Router.
    tokio::spawn(async move {
        let reason = match worker.await {
            Ok(()) => "normal".to_string(),
            Err(e) => format!("abnormal: {e}"),
        };
        agent.send(AgentMsg::RouterDown {
            monitor_ref,
            reason,
        });
    });

    RouterSpawn {
        handle,
        monitor_ref,
    }
}

async fn run_router(
    agent: AgentHandle,
    ctx: ActionContext,
    request: ActionRequest,
    auto_complete_todo: bool,
    rx: mpsc::UnboundedReceiver<RouterMsg>,
    monitor_ref: MonitorRef,
) {
    debug!("action execute start");

    // Secret placeholders are resolved before anything observable happens;
    // an unknown secret surfaces as the action's error result.
    let request = match resolve_placeholders(&request.params, ctx.secrets.as_ref()) {
        Ok(params) => ActionRequest {
            params,
            ..request.clone()
        },
        Err(e) => {
            warn!(action_id = %request.action_id, "secret resolution failed: {e}");
            deliver(
                &agent,
                ActionOutcome::err(&request.action_id, format!("secret resolution failed: {e}")),
            );
            return;
        }
    };

    let mut outcome = match ctx.registry.execute(&request, &ctx).await {
        Ok(outcome) => outcome,
        Err(e) => ActionOutcome::err(&request.action_id, e.to_string()),
    };
    debug!(is_error = outcome.is_error, "action execute stop");

    let shell_job = outcome.shell_job.take();
    let succeeded = !outcome.is_error;
    match shell_job {
        Some(job) => {
            // Announce the command id before the result, so the agent's
            // shell_routers entry exists by the time anyone can know the id.
            agent.send(AgentMsg::ShellRunning {
                command_id: job.command_id.clone(),
                monitor_ref,
            });
            deliver(&agent, outcome);
            serve_shell(agent, job, rx).await;
        }
        None => {
            deliver(&agent, outcome);
            if auto_complete_todo && succeeded {
                agent.send(AgentMsg::MarkFirstTodoDone);
            }
        }
    }
}

fn deliver(agent: &AgentHandle, outcome: ActionOutcome) {
    if !agent.send(AgentMsg::ActionResult { outcome }) {
        debug!("agent gone before result delivery");
    }
}

/// Keep the Router alive while its shell command runs: answer status and
/// termination requests, and report natural completion as a system event
/// (the `running` result was already integrated).
async fn serve_shell(agent: AgentHandle, mut job: ShellJob, mut rx: mpsc::UnboundedReceiver<RouterMsg>) {
    let mut poll = tokio::time::interval(SHELL_POLL_INTERVAL);
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(RouterMsg::ShellStatus { reply }) => {
                    let _ = reply.send(job.status());
                }
                Some(RouterMsg::ShellTerminate { reply }) => {
                    let report = job.terminate().await;
                    let _ = reply.send(report);
                    return;
                }
                Some(RouterMsg::Stop { reply }) => {
                    let _ = job.terminate().await;
                    let _ = reply.send(());
                    return;
                }
                None => {
                    let _ = job.terminate().await;
                    return;
                }
            },
            _ = poll.tick() => {
                if let Some(report) = job.try_finished() {
                    agent.send(AgentMsg::SystemEvent {
                        name: "shell_completed".to_string(),
                        payload: report,
                    });
                    return;
                }
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::env::Env;
    use quorum_actions::{NoopRuntimeOps, StaticSecretStore};

    fn test_ctx(env: &Env, groups: &[&str], secrets: StaticSecretStore) -> ActionContext {
        ActionContext {
            agent_id: "a1".into(),
            capability_groups: groups.iter().map(|s| s.to_string()).collect(),
            ops: Arc::new(NoopRuntimeOps),
            secrets: Arc::new(secrets),
            shell_threshold: Duration::from_millis(100),
            registry: Arc::clone(&env.actions),
        }
    }

    async fn next_result(rx: &mut tokio::sync::mpsc::UnboundedReceiver<AgentMsg>) -> ActionOutcome {
        loop {
            match rx.recv().await.expect("agent mailbox open") {
                AgentMsg::ActionResult { outcome } => return outcome,
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn router_delivers_result_and_down() {
        let env = Env::for_test();
        let (agent, mut rx) = AgentHandle::channel();
        let ctx = test_ctx(&env, &["agent"], StaticSecretStore::new());
        let spawn = spawn_router(
            agent,
            ctx,
            ActionRequest::new("act-1", "orient", json!({"thoughts": "hm"})),
            false,
        );

        let outcome = next_result(&mut rx).await;
        assert_eq!(outcome.action_id, "act-1");
        assert!(!outcome.is_error);

        // The monitor fires after delivery.
        loop {
            match rx.recv().await.expect("mailbox open") {
                AgentMsg::RouterDown {
                    monitor_ref,
                    reason,
                } => {
                    assert_eq!(monitor_ref, spawn.monitor_ref);
                    assert_eq!(reason, "normal");
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn denied_action_is_error_result() {
        let env = Env::for_test();
        let (agent, mut rx) = AgentHandle::channel();
        let ctx = test_ctx(&env, &[], StaticSecretStore::new());
        spawn_router(
            agent,
            ctx,
            ActionRequest::new("act-1", "orient", json!({})),
            false,
        );
        let outcome = next_result(&mut rx).await;
        assert!(outcome.is_error);
        assert!(outcome.content["error"]
            .as_str()
            .unwrap()
            .contains("not allowed"));
    }

    #[tokio::test]
    async fn unknown_secret_fails_before_execution() {
        let env = Env::for_test();
        let (agent, mut rx) = AgentHandle::channel();
        let ctx = test_ctx(&env, &["agent"], StaticSecretStore::new());
        spawn_router(
            agent,
            ctx,
            ActionRequest::new("act-1", "orient", json!({"thoughts": "{{SECRET:NOPE}}"})),
            false,
        );
        let outcome = next_result(&mut rx).await;
        assert!(outcome.is_error);
        assert!(outcome.content["error"]
            .as_str()
            .unwrap()
            .contains("secret resolution failed"));
    }

    #[tokio::test]
    async fn auto_complete_todo_message_follows_success() {
        let env = Env::for_test();
        let (agent, mut rx) = AgentHandle::channel();
        let ctx = test_ctx(&env, &["agent"], StaticSecretStore::new());
        spawn_router(
            agent,
            ctx,
            ActionRequest::new("act-1", "orient", json!({})),
            true,
        );
        let _ = next_result(&mut rx).await;
        loop {
            match rx.recv().await.expect("mailbox open") {
                AgentMsg::MarkFirstTodoDone => break,
                AgentMsg::RouterDown { .. } => panic!("no MarkFirstTodoDone before down"),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn long_shell_announces_command_and_serves_status() {
        let env = Env::for_test();
        let (agent, mut rx) = AgentHandle::channel();
        let ctx = test_ctx(&env, &["shell"], StaticSecretStore::new());
        let spawn = spawn_router(
            agent,
            ctx,
            ActionRequest::new("act-1", "shell", json!({"command": "sleep 5"})),
            false,
        );

        let command_id = loop {
            match rx.recv().await.expect("mailbox open") {
                AgentMsg::ShellRunning { command_id, .. } => break command_id,
                _ => continue,
            }
        };
        let outcome = next_result(&mut rx).await;
        assert_eq!(outcome.content["status"], "running");
        assert_eq!(outcome.content["command_id"], command_id.as_str());

        let status = spawn.handle.shell_status().await.unwrap();
        assert_eq!(status["status"], "running");

        let report = spawn.handle.shell_terminate().await.unwrap();
        assert_eq!(report["status"], "terminated");
    }

    #[tokio::test]
    async fn shell_completion_is_reported_as_system_event() {
        let env = Env::for_test();
        let (agent, mut rx) = AgentHandle::channel();
        let ctx = test_ctx(&env, &["shell"], StaticSecretStore::new());
        // Outlives the 100ms threshold, then finishes on its own.
        spawn_router(
            agent,
            ctx,
            ActionRequest::new("act-1", "shell", json!({"command": "sleep 0.3; echo finished"})),
            false,
        );
        loop {
            match rx.recv().await.expect("mailbox open") {
                AgentMsg::SystemEvent { name, payload } => {
                    assert_eq!(name, "shell_completed");
                    assert!(payload["stdout"].as_str().unwrap().contains("finished"));
                    break;
                }
                _ => continue,
            }
        }
    }
}

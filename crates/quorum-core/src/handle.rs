// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use quorum_actions::ActionOutcome;

use crate::consensus::ActionResponse;
use crate::history::HistoryEntry;
use crate::state::{PendingActionInfo, StateSnapshot, TimerInfo};
use crate::CoreError;

/// Identifies one monitored child task (Router, MCP client) of an agent.
pub type MonitorRef = Uuid;

/// Everything that can land in an agent's mailbox. All variants except
/// `Request` are asynchronous; `Request` carries a reply channel and
/// serializes with the rest of the mailbox.
#[derive(Debug)]
pub enum AgentMsg {
    /// A message from another agent.
    AgentMessage { from: String, content: Value },
    /// A message from the user; handled as an agent message from "parent".
    UserMessage { content: Value },
    /// A Router delivering its action outcome.
    ActionResult { outcome: ActionOutcome },
    /// A long-running shell command announced its command id; routes future
    /// status/terminate requests to the owning Router.
    ShellRunning {
        command_id: String,
        monitor_ref: MonitorRef,
    },
    /// An internal event worth recording (e.g. a background shell command
    /// finishing after its `running` result was already integrated).
    SystemEvent { name: String, payload: Value },
    /// A monitored task died.
    RouterDown {
        monitor_ref: MonitorRef,
        reason: String,
    },
    /// The parent agent's process went away; begin graceful shutdown.
    ParentDown,
    /// Run one consensus cycle, subject to the staleness check.
    TriggerConsensus,
    /// A wait timer fired; honored only for the active generation.
    WaitExpired { id: Uuid, generation: u64 },
    /// Sent by a Router after a successful action with
    /// `auto_complete_todo = true`.
    MarkFirstTodoDone,
    /// Synchronous request/reply.
    Request {
        request: AgentRequest,
        reply: oneshot::Sender<AgentReply>,
    },
    /// Stop the agent, tearing down routers and children first.
    Stop {
        reply: Option<oneshot::Sender<()>>,
    },
}

#[derive(Debug)]
pub enum AgentRequest {
    GetState,
    GetModelHistories,
    GetPendingActions,
    GetWaitTimer,
    SetDismissing(bool),
    IsDismissing,
    AddPendingAction {
        action_id: String,
        action_type: String,
        params: Value,
        acked: bool,
    },
    /// Dispatch a decision as if it came from consensus.
    ProcessAction(ActionResponse),
    ShellStatus {
        command_id: String,
    },
    ShellTerminate {
        command_id: String,
    },
}

#[derive(Debug)]
pub enum AgentReply {
    State(Box<StateSnapshot>),
    Histories(HashMap<String, Vec<HistoryEntry>>),
    Pending(Vec<PendingActionInfo>),
    Timer(Option<TimerInfo>),
    Flag(bool),
    Shell(Value),
    Done,
    Error(String),
}

/// A reference to a running agent actor: async send, sync request/reply,
/// and closure-based monitoring. Cheap to clone; equality is by the
/// underlying process, not the clone.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    handle_id: Uuid,
    tx: mpsc::UnboundedSender<AgentMsg>,
}

impl PartialEq for AgentHandle {
    fn eq(&self, other: &Self) -> bool {
        self.handle_id == other.handle_id
    }
}
impl Eq for AgentHandle {}

impl AgentHandle {
    /// Create a handle plus the mailbox receiver for the actor loop.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                handle_id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.handle_id
    }

    /// Fire-and-forget send. Returns `false` when the agent is gone.
    pub fn send(&self, msg: AgentMsg) -> bool {
        self.tx.send(msg).is_ok()
    }

    /// Synchronous request: enqueues into the mailbox and awaits the reply.
    pub async fn request(&self, request: AgentRequest) -> Result<AgentReply, CoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(AgentMsg::Request {
                request,
                reply: reply_tx,
            })
            .map_err(|_| CoreError::NoProcess)?;
        reply_rx.await.map_err(|_| CoreError::NoProcess)
    }

    /// Stop the agent and wait for its teardown to finish.
    pub async fn stop(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(AgentMsg::Stop {
                reply: Some(reply_tx),
            })
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }

    /// Resolves when the agent's mailbox is gone — the monitoring primitive
    /// parents and watchers use.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::Serialize;
use serde_json::Value;

use quorum_model::ChatMessage;
use quorum_store::CostRecord;

/// Everything published on the broadcast bus. UIs and tests subscribe to
/// the topics in [`topics`] and pattern-match on these.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    AgentSpawned {
        agent_id: String,
        task_id: String,
        parent_id: Option<String>,
    },
    AgentTerminated {
        agent_id: String,
    },
    /// Emitted once per consensus cycle, after all injectors have run, so
    /// observers see exactly what each model saw.
    LogEntry {
        metadata: LogMetadata,
    },
    CostRecorded(CostRecord),
    ActionStarted {
        action_type: String,
    },
    ActionCompleted {
        action_type: String,
        action_id: String,
        is_error: bool,
        duration_ms: u64,
    },
    AgentMessage {
        from: String,
        to: String,
        content: Value,
        thread: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct LogMetadata {
    pub sent_messages: Vec<SentMessages>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SentMessages {
    pub model_id: String,
    pub messages: Vec<ChatMessage>,
}

/// Topic names, kept in one place so publishers and subscribers agree.
pub mod topics {
    pub const LIFECYCLE: &str = "agents:lifecycle";
    pub const ACTIONS: &str = "actions:all";
    pub const MESSAGES_ALL: &str = "messages:all";

    pub fn logs(agent_id: &str) -> String {
        format!("agents:{agent_id}:logs")
    }

    pub fn costs(agent_id: &str) -> String {
        format!("agents:{agent_id}:costs")
    }

    pub fn messages(agent_id: &str) -> String {
        format!("messages:{agent_id}")
    }

    pub fn agent_messages(agent_id: &str) -> String {
        format!("agents:{agent_id}:messages")
    }

    pub fn thread(thread_id: &str) -> String {
        format!("messages:threads:{thread_id}")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One persisted agent row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub task_id: String,
    pub parent_id: Option<String>,
    /// "initializing" | "ready" | "dismissing" | "terminated"
    pub status: String,
    /// The normalized spawn config, kept opaque here.
    pub config: serde_json::Value,
    /// Serialized agent state (model histories, ACE fields, todos).
    pub state: HashMap<String, serde_json::Value>,
    pub inserted_at: DateTime<Utc>,
}

impl AgentRecord {
    pub fn new(
        agent_id: impl Into<String>,
        task_id: impl Into<String>,
        parent_id: Option<String>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            task_id: task_id.into(),
            parent_id,
            status: "initializing".into(),
            config,
            state: HashMap::new(),
            inserted_at: Utc::now(),
        }
    }
}

/// One cost ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CostRecord {
    pub agent_id: String,
    pub task_id: String,
    /// "llm_query" | "reflection" | "embedding"
    pub cost_type: String,
    pub cost_usd: f64,
    pub metadata: serde_json::Value,
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Persistence contracts for agent rows and cost records, plus the in-memory
//! implementation used by tests and the default runtime.
//!
//! Callers treat every store failure as non-fatal: a dead database must
//! never take an agent down with it.

mod memory;
mod records;

pub use memory::MemoryStore;
pub use records::{AgentRecord, CostRecord};

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("agent not found: {0}")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Snapshot persistence for agents.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Insert the initial row for a freshly spawned agent.
    async fn put_agent(&self, record: AgentRecord) -> Result<(), StoreError>;

    /// Merge `state` into the agent's persisted state map.
    async fn update_agent_state(
        &self,
        agent_id: &str,
        state: HashMap<String, serde_json::Value>,
    ) -> Result<(), StoreError>;

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>, StoreError>;
}

/// Append-only cost ledger.
#[async_trait]
pub trait CostStore: Send + Sync {
    async fn put_cost_record(&self, record: CostRecord) -> Result<(), StoreError>;
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::{AgentRecord, AgentStore, CostRecord, CostStore, StoreError};

/// In-memory store backing both contracts. Cheap to clone; all clones share
/// state, so a test can hand the same store to the runtime and assert on it.
#[derive(Clone, Default)]
pub struct MemoryStore {
    agents: Arc<Mutex<HashMap<String, AgentRecord>>>,
    costs: Arc<Mutex<Vec<CostRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cost_records(&self) -> Vec<CostRecord> {
        self.costs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn agent_count(&self) -> usize {
        self.agents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn put_agent(&self, record: AgentRecord) -> Result<(), StoreError> {
        self.agents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.agent_id.clone(), record);
        Ok(())
    }

    async fn update_agent_state(
        &self,
        agent_id: &str,
        state: HashMap<String, serde_json::Value>,
    ) -> Result<(), StoreError> {
        let mut agents = self.agents.lock().unwrap_or_else(PoisonError::into_inner);
        let record = agents
            .get_mut(agent_id)
            .ok_or_else(|| StoreError::NotFound(agent_id.to_string()))?;
        record.state.extend(state);
        Ok(())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>, StoreError> {
        Ok(self
            .agents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(agent_id)
            .cloned())
    }
}

#[async_trait]
impl CostStore for MemoryStore {
    async fn put_cost_record(&self, record: CostRecord) -> Result<(), StoreError> {
        self.costs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

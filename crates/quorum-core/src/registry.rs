// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::handle::AgentHandle;
use crate::CoreError;

/// Metadata kept alongside each registered agent.
#[derive(Debug, Clone)]
pub struct AgentMeta {
    pub task_id: String,
    pub parent_handle: Option<AgentHandle>,
    pub spawned_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub handle: AgentHandle,
    pub meta: AgentMeta,
}

/// Process-wide `agent_id ↔ handle` lookup.
///
/// The registry is the single owner of the id/handle mapping; agent state
/// records keep only opaque handles, never back-pointers. Inserts are
/// atomic — both directions are written under one lock, and duplicate ids
/// are rejected before anything is mutated.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    by_id: HashMap<String, RegistryEntry>,
    by_handle: HashMap<Uuid, String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        agent_id: &str,
        handle: AgentHandle,
        meta: AgentMeta,
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.by_id.contains_key(agent_id) {
            return Err(CoreError::DuplicateAgentId(agent_id.to_string()));
        }
        inner.by_handle.insert(handle.id(), agent_id.to_string());
        inner
            .by_id
            .insert(agent_id.to_string(), RegistryEntry { handle, meta });
        Ok(())
    }

    pub fn lookup(&self, agent_id: &str) -> Option<RegistryEntry> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .get(agent_id)
            .cloned()
    }

    /// Reverse lookup: which agent id does this handle belong to?
    pub fn agent_id_for(&self, handle: &AgentHandle) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_handle
            .get(&handle.id())
            .cloned()
    }

    pub fn remove(&self, agent_id: &str) -> Option<RegistryEntry> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let entry = inner.by_id.remove(agent_id)?;
        inner.by_handle.remove(&entry.handle.id());
        Some(entry)
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .contains_key(agent_id)
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> AgentMeta {
        AgentMeta {
            task_id: "t1".into(),
            parent_handle: None,
            spawned_at: Utc::now(),
        }
    }

    #[test]
    fn insert_and_lookup_both_directions() {
        let reg = Registry::new();
        let (handle, _rx) = AgentHandle::channel();
        reg.insert("a1", handle.clone(), meta()).unwrap();
        assert!(reg.contains("a1"));
        assert_eq!(reg.lookup("a1").unwrap().handle, handle);
        assert_eq!(reg.agent_id_for(&handle).as_deref(), Some("a1"));
    }

    #[test]
    fn duplicate_insert_is_rejected_atomically() {
        let reg = Registry::new();
        let (h1, _rx1) = AgentHandle::channel();
        let (h2, _rx2) = AgentHandle::channel();
        reg.insert("a1", h1.clone(), meta()).unwrap();
        let err = reg.insert("a1", h2.clone(), meta()).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateAgentId(id) if id == "a1"));
        // The losing handle must not have leaked into the reverse map.
        assert!(reg.agent_id_for(&h2).is_none());
        assert_eq!(reg.lookup("a1").unwrap().handle, h1);
    }

    #[test]
    fn remove_clears_both_directions() {
        let reg = Registry::new();
        let (handle, _rx) = AgentHandle::channel();
        reg.insert("a1", handle.clone(), meta()).unwrap();
        let entry = reg.remove("a1").unwrap();
        assert_eq!(entry.handle, handle);
        assert!(!reg.contains("a1"));
        assert!(reg.agent_id_for(&handle).is_none());
        assert!(reg.remove("a1").is_none());
    }

    #[test]
    fn list_is_sorted() {
        let reg = Registry::new();
        let mut receivers = Vec::new();
        for id in ["b", "a", "c"] {
            let (h, rx) = AgentHandle::channel();
            reg.insert(id, h, meta()).unwrap();
            receivers.push(rx);
        }
        assert_eq!(reg.list(), vec!["a", "b", "c"]);
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use quorum_actions::{builtin::builtin_registry, ActionRegistry, EnvSecretStore, SecretStore};
use quorum_bus::Bus;
use quorum_config::Config;
use quorum_model::ProviderPool;
use quorum_store::{AgentStore, CostStore, MemoryStore};

use crate::events::Event;
use crate::registry::Registry;

/// The process-wide collaborators handed to every agent.
///
/// Passing them as one cloneable record (instead of true globals) lets
/// tests substitute isolated instances — their own bus, stores, providers
/// and secrets — without any global state to reset between tests.
#[derive(Clone)]
pub struct Env {
    pub bus: Bus<Event>,
    pub registry: Registry,
    pub agent_store: Arc<dyn AgentStore>,
    pub cost_store: Arc<dyn CostStore>,
    pub providers: ProviderPool,
    pub secrets: Arc<dyn SecretStore>,
    pub actions: Arc<ActionRegistry>,
    pub config: Arc<Config>,
    /// Kept when the stores are memory-backed, so tests can assert on them.
    memory: Option<MemoryStore>,
}

impl Env {
    /// Build the runtime environment from configuration. Persistence is
    /// memory-backed; a durable store plugs in through the same traits.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let providers = ProviderPool::from_config(&config)?;
        let store = MemoryStore::new();
        Ok(Self {
            bus: Bus::new(),
            registry: Registry::new(),
            agent_store: Arc::new(store.clone()),
            cost_store: Arc::new(store.clone()),
            providers,
            secrets: Arc::new(EnvSecretStore),
            actions: Arc::new(builtin_registry()),
            config: Arc::new(config),
            memory: Some(store),
        })
    }

    /// Isolated environment for tests: memory stores, builtin actions, the
    /// test-default provider pool, and no secrets.
    pub fn for_test() -> Self {
        let store = MemoryStore::new();
        Self {
            bus: Bus::new(),
            registry: Registry::new(),
            agent_store: Arc::new(store.clone()),
            cost_store: Arc::new(store.clone()),
            providers: ProviderPool::test_default(),
            secrets: Arc::new(quorum_actions::StaticSecretStore::new()),
            actions: Arc::new(builtin_registry()),
            config: Arc::new(Config::default()),
            memory: Some(store),
        }
    }

    /// The backing memory store, when one is in use.
    pub fn memory_store(&self) -> Option<MemoryStore> {
        self.memory.clone()
    }
}

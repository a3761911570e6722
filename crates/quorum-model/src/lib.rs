// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod catalog;
mod error;
mod mock;
mod openai_compat;
mod provider;
mod types;

pub use error::ModelError;
pub use mock::{MockProvider, ScriptedMockProvider};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::{ChatRequest, Completion, ModelProvider, Usage};
pub use types::*;

use std::collections::HashMap;
use std::sync::Arc;

use quorum_config::{Config, ProviderConfig};

/// The model id used when an agent has no explicit pool (test default).
pub const DEFAULT_MODEL_ID: &str = "default";

/// An immutable map of `model_id → provider`, shared by every agent.
#[derive(Clone, Default)]
pub struct ProviderPool {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
}

impl ProviderPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool containing only the deterministic test-default mock.
    pub fn test_default() -> Self {
        let mut pool = Self::new();
        pool.insert(Arc::new(MockProvider::new(DEFAULT_MODEL_ID)));
        pool
    }

    pub fn insert(&mut self, provider: Arc<dyn ModelProvider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn get(&self, model_id: &str) -> Option<Arc<dyn ModelProvider>> {
        self.providers.get(model_id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Build the pool from configuration. Every configured provider entry
    /// becomes one pool member keyed by its config key; the test-default
    /// mock is always present so `model_pool = nil` agents keep working.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut pool = Self::test_default();
        for (model_id, pc) in &config.providers {
            pool.insert(build_provider(model_id, pc)?);
        }
        Ok(pool)
    }
}

fn build_provider(
    model_id: &str,
    cfg: &ProviderConfig,
) -> anyhow::Result<Arc<dyn ModelProvider>> {
    let api_key = resolve_api_key(cfg);
    match cfg.provider.as_str() {
        "openai_compat" => Ok(Arc::new(OpenAiCompatProvider::new(
            model_id,
            cfg.name.clone().unwrap_or_else(|| model_id.to_string()),
            cfg.base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".into()),
            api_key,
            cfg.max_tokens,
            cfg.temperature,
        ))),
        "mock" => Ok(Arc::new(MockProvider::new(model_id))),
        other => anyhow::bail!("unknown provider driver: {other}"),
    }
}

fn resolve_api_key(cfg: &ProviderConfig) -> Option<String> {
    cfg.api_key
        .clone()
        .or_else(|| cfg.api_key_env.as_ref().and_then(|k| std::env::var(k).ok()))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool_contains_default_mock() {
        let pool = ProviderPool::test_default();
        assert!(pool.get(DEFAULT_MODEL_ID).is_some());
        assert!(pool.get("other").is_none());
    }

    #[test]
    fn from_config_adds_configured_mock() {
        let mut config = Config::default();
        config.providers.insert(
            "m1".into(),
            quorum_config::ProviderConfig {
                provider: "mock".into(),
                name: None,
                base_url: None,
                api_key_env: None,
                api_key: None,
                max_tokens: None,
                temperature: None,
            },
        );
        let pool = ProviderPool::from_config(&config).unwrap();
        assert!(pool.get("m1").is_some());
        assert!(pool.get(DEFAULT_MODEL_ID).is_some());
    }

    #[test]
    fn from_config_rejects_unknown_driver() {
        let mut config = Config::default();
        config.providers.insert(
            "bad".into(),
            quorum_config::ProviderConfig {
                provider: "telepathy".into(),
                name: None,
                base_url: None,
                api_key_env: None,
                api_key: None,
                max_tokens: None,
                temperature: None,
            },
        );
        assert!(ProviderPool::from_config(&config).is_err());
    }
}

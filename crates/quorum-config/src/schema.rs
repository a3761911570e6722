// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `false`, so fields
/// that should be enabled unless explicitly disabled need a named function.
fn default_true() -> bool {
    true
}

fn default_shell_threshold_ms() -> u64 {
    100
}

fn default_wait_threshold_ms() -> u64 {
    1_000
}

fn default_keep_recent() -> usize {
    10
}

fn default_refinement_rounds() -> u32 {
    1
}

fn default_max_restarts() -> u32 {
    3
}

fn default_restart_window_secs() -> u64 {
    60
}

fn default_capability_groups() -> Vec<String> {
    vec!["agent".into(), "file_read".into(), "shell".into(), "web".into()]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Named provider endpoint configurations, referenced by the model ids
    /// in `runtime.model_pool`.
    ///
    /// ```yaml
    /// providers:
    ///   gpt-4o:
    ///     provider: openai_compat
    ///     base_url: https://api.openai.com/v1
    ///     api_key_env: OPENAI_API_KEY
    ///   local:
    ///     provider: openai_compat
    ///     base_url: http://localhost:11434/v1
    /// ```
    #[serde(default)]
    pub providers: std::collections::HashMap<String, ProviderConfig>,
    /// Defaults applied to the root agent spawned by `quorum run`.
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Ordered list of model ids consulted for every consensus cycle.
    /// `None` means "use the test default" (a single deterministic mock).
    /// An empty list makes consensus impossible and is rejected at spawn.
    #[serde(default)]
    pub model_pool: Option<Vec<String>>,
    /// Shell commands finishing within this many milliseconds return their
    /// output synchronously; longer commands go async and stay addressable
    /// by command id.
    #[serde(default = "default_shell_threshold_ms")]
    pub shell_smart_threshold_ms: u64,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    /// One-for-one supervisor restart budget: more than `max_restarts`
    /// restarts within `restart_window_secs` fails the supervisor itself.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_restart_window_secs")]
    pub restart_window_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model_pool: None,
            shell_smart_threshold_ms: default_shell_threshold_ms(),
            consensus: ConsensusConfig::default(),
            max_restarts: default_max_restarts(),
            restart_window_secs: default_restart_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Number of most-recent history entries preserved verbatim when a
    /// model's history is condensed after a context overflow.
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
    /// Maximum refinement rounds when too few responses parse as valid JSON.
    #[serde(default = "default_refinement_rounds")]
    pub max_refinement_rounds: u32,
    /// A decision whose numeric `wait` exceeds this threshold is treated as
    /// asynchronous: its pending action is inserted pre-acked so inbound
    /// messages keep flowing while it runs.
    #[serde(default = "default_wait_threshold_ms")]
    pub wait_threshold_ms: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            keep_recent: default_keep_recent(),
            max_refinement_rounds: default_refinement_rounds(),
            wait_threshold_ms: default_wait_threshold_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Driver identifier: "openai_compat" | "mock"
    pub provider: String,
    /// Model name forwarded to the provider API. Defaults to the pool key.
    #[serde(default)]
    pub name: Option<String>,
    /// Base URL of the endpoint (OpenAI-compatible drivers).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key (read at runtime).
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer `api_key_env` in version-controlled files.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// The normalized per-agent record consumed at spawn time.
///
/// Flexible inputs (CLI flags, spawn action params, restoration snapshots)
/// are normalized into this flat shape before an agent process starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique id; spawn fails with `invalid_config` when empty.
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub task_id: String,
    /// Id of the spawning agent, `None` for root agents.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Use deterministic test defaults (mock model pool) where unset.
    #[serde(default)]
    pub test_mode: bool,
    /// Restoring from a snapshot: skip all persistence writes.
    #[serde(default)]
    pub restoration_mode: bool,
    /// Capability groups this agent's actions may use.
    #[serde(default = "default_capability_groups")]
    pub capability_groups: Vec<String>,
    /// Per-agent model pool override; `None` inherits the runtime pool.
    #[serde(default)]
    pub model_pool: Option<Vec<String>>,
    #[serde(default)]
    pub profile_name: Option<String>,
    #[serde(default)]
    pub profile_description: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub active_skills: Vec<String>,
    /// Spend ceiling surfaced to the models via the budget injector.
    /// Advisory only; the runtime never hard-stops on it.
    #[serde(default)]
    pub budget_limit_usd: Option<f64>,
    /// Persist agent rows and state snapshots.
    #[serde(default = "default_true")]
    pub persist: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            task_id: String::new(),
            parent_id: None,
            test_mode: false,
            restoration_mode: false,
            capability_groups: default_capability_groups(),
            model_pool: None,
            profile_name: None,
            profile_description: None,
            skills: Vec::new(),
            active_skills: Vec::new(),
            budget_limit_usd: None,
            persist: true,
        }
    }
}

impl AgentConfig {
    /// Minimal valid config for tests: a named agent in test mode with
    /// persistence off.
    pub fn for_test(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            task_id: "test-task".into(),
            test_mode: true,
            persist: false,
            ..Self::default()
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

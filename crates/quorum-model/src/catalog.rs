// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Model catalog: static metadata for known models.

use serde::{Deserialize, Serialize};

/// Context window assumed for models missing from the catalog.
/// Deliberately conservative so condensation fires early rather than never.
pub const DEFAULT_CONTEXT_WINDOW: u32 = 32_768;

/// Metadata for a single model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelCatalogEntry {
    /// Pool-scoped model identifier (e.g. "gpt-4o", "default")
    pub id: String,
    /// Total context window in tokens (input + output)
    pub context_window: u32,
    /// Maximum output tokens per completion
    pub max_output_tokens: u32,
    /// USD per million input tokens
    #[serde(default)]
    pub input_cost_per_mtok: f64,
    /// USD per million output tokens
    #[serde(default)]
    pub output_cost_per_mtok: f64,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    models: Vec<ModelCatalogEntry>,
}

/// Return all entries from the bundled static catalog.
pub fn static_catalog() -> Vec<ModelCatalogEntry> {
    let yaml = include_str!("../models.yaml");
    let catalog: CatalogFile =
        serde_yaml::from_str(yaml).expect("bundled models.yaml must be valid");
    catalog.models
}

/// Find a catalog entry by model id.
pub fn lookup(model_id: &str) -> Option<ModelCatalogEntry> {
    static_catalog().into_iter().find(|e| e.id == model_id)
}

/// Context window for a model, falling back to [`DEFAULT_CONTEXT_WINDOW`].
pub fn context_limit(model_id: &str) -> u32 {
    lookup(model_id)
        .map(|e| e.context_window)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW)
}

/// Dollar cost of a completion given the catalog's per-token pricing.
/// Unknown models cost zero (self-hosted endpoints).
pub fn completion_cost(model_id: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    match lookup(model_id) {
        Some(e) => {
            (input_tokens as f64 * e.input_cost_per_mtok
                + output_tokens as f64 * e.output_cost_per_mtok)
                / 1_000_000.0
        }
        None => 0.0,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use crate::{catalog, ChatMessage, ModelError};

/// A request for one completion.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Token usage and cost for one completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
}

/// A completed (non-streaming) model response.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Pool-scoped model identifier (the key agents put in their model pool).
    fn id(&self) -> &str;

    /// Run one completion.
    async fn complete(&self, req: ChatRequest) -> Result<Completion, ModelError>;

    /// Context window size in tokens.
    ///
    /// Reads the static catalog by id; `None` when the model is unknown.
    fn context_window(&self) -> Option<u32> {
        catalog::lookup(self.id()).map(|e| e.context_window)
    }
}

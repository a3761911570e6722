// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{ChatRequest, Completion, ModelError, ModelProvider, Usage};

/// Deterministic mock provider. Always decides to idle, so an agent wired to
/// the test-default pool quiesces instead of spinning.
pub struct MockProvider {
    id: String,
}

impl MockProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(&self, req: ChatRequest) -> Result<Completion, ModelError> {
        let input_tokens = crate::approx_tokens(&req.messages) as u32;
        Ok(Completion {
            text: r#"{"action":"wait","params":{},"wait":true,"reasoning":"mock provider idles"}"#
                .to_string(),
            usage: Usage {
                input_tokens,
                output_tokens: 16,
                cost_usd: 0.0,
            },
        })
    }
}

/// A pre-scripted mock provider. Each `complete` call pops the next script
/// from the front of the queue; a script is either a completion text or an
/// error to inject (e.g. a context overflow). Every request is captured so
/// tests can inspect exactly what was sent — including the retry after
/// condensation.
pub struct ScriptedMockProvider {
    id: String,
    scripts: Mutex<Vec<Result<String, ModelError>>>,
    /// Every `ChatRequest` seen by this provider, in call order.
    pub requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedMockProvider {
    pub fn new(id: impl Into<String>, scripts: Vec<Result<String, ModelError>>) -> Self {
        Self {
            id: id.into(),
            scripts: Mutex::new(scripts),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Provider that answers every call with the same decision text.
    pub fn always(id: impl Into<String>, text: impl Into<String>) -> Self {
        let t = text.into();
        Self::new(id, vec![Ok(t)])
    }

    /// The most recent request, if any.
    pub fn last_request(&self) -> Option<ChatRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedMockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(&self, req: ChatRequest) -> Result<Completion, ModelError> {
        let input_tokens = crate::approx_tokens(&req.messages) as u32;
        self.requests.lock().unwrap().push(req);

        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Exhausted scripts repeat the idle decision so a test agent
                // quiesces rather than erroring.
                Ok(r#"{"action":"wait","params":{},"wait":true,"reasoning":"scripts exhausted"}"#
                    .to_string())
            } else {
                scripts.remove(0)
            }
        };

        script.map(|text| Completion {
            text,
            usage: Usage {
                input_tokens,
                output_tokens: 32,
                cost_usd: 0.0001,
            },
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

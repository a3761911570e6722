// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! OpenAI-compatible chat completion driver.
//!
//! Most hosted and local endpoints (OpenAI, vLLM, llama.cpp, Ollama,
//! OpenRouter) speak the same `/chat/completions` wire format, so a single
//! driver configured with a base URL and an optional bearer key covers the
//! whole family. Responses are requested non-streaming: consensus consumes
//! whole decisions, not deltas.

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    catalog, ChatMessage, ChatRequest, Completion, ContentPart, MessageContent, ModelError,
    ModelProvider, Role, Usage,
};

pub struct OpenAiCompatProvider {
    /// Pool-scoped id returned by `ModelProvider::id()`.
    id: String,
    /// Model name forwarded to the API (may differ from the pool id).
    model: String,
    chat_url: String,
    api_key: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// `base_url` ends **before** `/chat/completions`, e.g.
    /// `https://api.openai.com/v1`.
    pub fn new(
        id: impl Into<String>,
        model: impl Into<String>,
        base_url: impl AsRef<str>,
        api_key: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        let base = base_url.as_ref().trim_end_matches('/');
        Self {
            id: id.into(),
            model: model.into(),
            chat_url: format!("{base}/chat/completions"),
            api_key,
            max_tokens,
            temperature,
            client: reqwest::Client::new(),
        }
    }

    fn wire_messages(messages: &[ChatMessage]) -> Vec<Value> {
        messages.iter().map(wire_message).collect()
    }
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn wire_message(msg: &ChatMessage) -> Value {
    let content = match &msg.content {
        MessageContent::Text(t) => Value::String(t.clone()),
        MessageContent::Parts(parts) => Value::Array(
            parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                    ContentPart::Image { data, mime_type } => {
                        let b64 = base64::engine::general_purpose::STANDARD.encode(data);
                        json!({
                            "type": "image_url",
                            "image_url": { "url": format!("data:{mime_type};base64,{b64}") }
                        })
                    }
                })
                .collect(),
        ),
    };
    json!({ "role": wire_role(msg.role), "content": content })
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(&self, req: ChatRequest) -> Result<Completion, ModelError> {
        let mut body = json!({
            "model": self.model,
            "messages": Self::wire_messages(&req.messages),
            "stream": false,
        });
        if let Some(mt) = req.max_tokens.or(self.max_tokens) {
            body["max_tokens"] = json!(mt);
        }
        if let Some(t) = req.temperature.or(self.temperature) {
            body["temperature"] = json!(t);
        }

        let mut http = self.client.post(&self.chat_url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let resp = http.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            let err = ModelError::Api {
                status: status.as_u16(),
                message: text,
            };
            // Normalize overflow bodies into the recoverable error kind so
            // the consensus layer can condense and retry.
            if err.is_context_overflow() {
                let limit = match &err {
                    ModelError::Api { message, .. } => extract_n_ctx(message),
                    _ => None,
                };
                return Err(ModelError::ContextLengthExceeded { limit });
            }
            return Err(err);
        }

        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| ModelError::InvalidResponse(format!("bad JSON body: {e}")))?;

        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        if content.is_empty() {
            return Err(ModelError::EmptyResponse);
        }

        let input_tokens = parsed["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32;
        let output_tokens = parsed["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32;
        debug!(model = %self.model, input_tokens, output_tokens, "completion finished");

        Ok(Completion {
            text: content,
            usage: Usage {
                input_tokens,
                output_tokens,
                cost_usd: catalog::completion_cost(&self.id, input_tokens, output_tokens),
            },
        })
    }
}

/// Extract `n_ctx` from a llama.cpp-style overflow error body:
/// `{"error":{"type":"exceed_context_size_error","n_ctx":54272,...}}`.
fn extract_n_ctx(message: &str) -> Option<u32> {
    let json_start = message.find('{')?;
    let body: Value = serde_json::from_str(&message[json_start..]).ok()?;
    if let Some(n) = body["error"]["n_ctx"].as_u64() {
        return Some(n as u32);
    }
    body["n_ctx"].as_u64().map(|n| n as u32)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Errors from a model provider.
///
/// `ContextLengthExceeded` is the one recoverable kind: the consensus layer
/// condenses the model's history and retries exactly once per cycle.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("context length exceeded (limit: {limit:?})")]
    ContextLengthExceeded { limit: Option<u32> },

    #[error("http error: {0}")]
    Http(String),

    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("provider returned an empty response")]
    EmptyResponse,

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    /// True when this error means "the request was too large for the model's
    /// context window" — the only failure kind the consensus layer retries
    /// after condensation.
    pub fn is_context_overflow(&self) -> bool {
        match self {
            Self::ContextLengthExceeded { .. } => true,
            Self::Api { message, .. } => {
                message.contains("context_length_exceeded")
                    || message.contains("exceed_context_size_error")
                    || message.contains("maximum context length")
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(e.to_string())
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

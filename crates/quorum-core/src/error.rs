// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Runtime error taxonomy.
///
/// Errors are values everywhere in this crate: an agent never crashes on a
/// malformed inbound message, consensus failures leave it `ready`, and only
/// parent death tears it down.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("every model in the pool failed")]
    AllModelsFailed,

    #[error("no response parsed as a valid decision")]
    InvalidJson,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("duplicate agent id: {0}")]
    DuplicateAgentId(String),

    #[error("action not allowed: {0}")]
    ActionNotAllowed(String),

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("agent not found: {0}")]
    NotFound(String),

    #[error("agent process is gone")]
    NoProcess,

    #[error("supervisor restart intensity exceeded")]
    RestartIntensityExceeded,

    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    #[error(transparent)]
    Model(#[from] quorum_model::ModelError),

    #[error(transparent)]
    Action(#[from] quorum_actions::ActionError),
}

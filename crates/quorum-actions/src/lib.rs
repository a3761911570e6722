// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod action;
pub mod builtin;
mod context;
mod registry;
mod secrets;
mod shell_job;

pub use action::{
    ActionError, ActionOutcome, ActionRequest, TodoItem, TodoState,
};
pub use context::{ActionContext, ActionTelemetry, NoopRuntimeOps, RuntimeOps};
pub use registry::{ActionHandler, ActionRegistry};
pub use secrets::{resolve_placeholders, EnvSecretStore, SecretStore, StaticSecretStore};
pub use shell_job::{run_shell, ShellJob, ShellOutcome};

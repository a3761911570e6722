// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::json;

use crate::{
    run_shell, ActionContext, ActionError, ActionHandler, ActionOutcome, ActionRequest,
    ShellOutcome,
};

/// Executes a shell command with the smart sync/async threshold.
///
/// Fast commands return their full output in the action result. Commands
/// that outlive the threshold return `{status: "running", command_id}` and
/// hand the live job to the Router, which stays up to answer status and
/// termination requests for that command id.
pub struct ShellAction;

#[async_trait]
impl ActionHandler for ShellAction {
    fn name(&self) -> &str {
        "shell"
    }

    fn capability_group(&self) -> &str {
        "shell"
    }

    async fn execute(
        &self,
        req: &ActionRequest,
        ctx: &ActionContext,
    ) -> Result<ActionOutcome, ActionError> {
        let command = req
            .params
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ActionError::InvalidParams("shell requires 'command'".into()))?;
        let workdir = req.params.get("workdir").and_then(|v| v.as_str());

        match run_shell(command, workdir, ctx.shell_threshold).await? {
            ShellOutcome::Completed {
                stdout,
                stderr,
                exit_code,
            } => {
                let mut out = ActionOutcome::ok(
                    &req.action_id,
                    json!({
                        "status": "completed",
                        "exit_code": exit_code,
                        "stdout": stdout,
                        "stderr": stderr,
                    }),
                );
                out.is_error = exit_code != 0;
                Ok(out)
            }
            ShellOutcome::Running(job) => {
                let mut out = ActionOutcome::ok(
                    &req.action_id,
                    json!({
                        "status": "running",
                        "command_id": job.command_id,
                        "command": job.command,
                    }),
                );
                out.shell_job = Some(job);
                Ok(out)
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

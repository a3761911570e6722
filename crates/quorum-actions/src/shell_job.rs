// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::debug;
use uuid::Uuid;

/// Output cap applied to captured stdout/stderr.
const OUTPUT_LIMIT: usize = 100_000;

/// Result of starting a shell command with a smart threshold: commands that
/// finish inside the threshold complete synchronously, everything else keeps
/// running as an addressable job.
#[derive(Debug)]
pub enum ShellOutcome {
    Completed {
        stdout: String,
        stderr: String,
        exit_code: i32,
    },
    Running(ShellJob),
}

/// A still-running shell command. Owned by the Router that started it; the
/// command id is the stable address used to route status and termination
/// requests back to that Router.
#[derive(Debug)]
pub struct ShellJob {
    pub command_id: String,
    pub command: String,
    child: Child,
    stdout: Arc<Mutex<String>>,
    stderr: Arc<Mutex<String>>,
}

/// Start `command` under `sh -c` and wait up to `threshold` for it to
/// finish. Outputs are streamed into shared buffers from the start, so a
/// command that goes async keeps accumulating output for later status calls.
pub async fn run_shell(
    command: &str,
    workdir: Option<&str>,
    threshold: Duration,
) -> std::io::Result<ShellOutcome> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn()?;
    let stdout_buf = Arc::new(Mutex::new(String::new()));
    let stderr_buf = Arc::new(Mutex::new(String::new()));

    if let Some(out) = child.stdout.take() {
        spawn_reader(out, Arc::clone(&stdout_buf));
    }
    if let Some(err) = child.stderr.take() {
        spawn_reader(err, Arc::clone(&stderr_buf));
    }

    tokio::select! {
        status = child.wait() => {
            let status = status?;
            // Give the reader tasks one scheduling round to drain the pipes.
            tokio::task::yield_now().await;
            Ok(ShellOutcome::Completed {
                stdout: take_buf(&stdout_buf),
                stderr: take_buf(&stderr_buf),
                exit_code: status.code().unwrap_or(-1),
            })
        }
        _ = tokio::time::sleep(threshold) => {
            let job = ShellJob {
                command_id: Uuid::new_v4().to_string(),
                command: command.to_string(),
                child,
                stdout: stdout_buf,
                stderr: stderr_buf,
            };
            debug!(command_id = %job.command_id, "shell command went async");
            Ok(ShellOutcome::Running(job))
        }
    }
}

fn spawn_reader<R: tokio::io::AsyncRead + Unpin + Send + 'static>(
    reader: R,
    buf: Arc<Mutex<String>>,
) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut guard = buf.lock().unwrap_or_else(PoisonError::into_inner);
                    if guard.len() < OUTPUT_LIMIT {
                        let room = OUTPUT_LIMIT - guard.len();
                        let text = String::from_utf8_lossy(&chunk[..n]);
                        if text.len() <= room {
                            guard.push_str(&text);
                        } else {
                            guard.push_str(&text[..room.min(text.len())]);
                            guard.push_str("\n…[output truncated]");
                        }
                    }
                }
            }
        }
    });
}

fn take_buf(buf: &Arc<Mutex<String>>) -> String {
    buf.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

impl ShellJob {
    /// Current status: still running, or finished with an exit code.
    /// Includes all output captured so far.
    pub fn status(&mut self) -> Value {
        match self.child.try_wait() {
            Ok(Some(status)) => json!({
                "status": "completed",
                "command_id": self.command_id,
                "exit_code": status.code().unwrap_or(-1),
                "stdout": take_buf(&self.stdout),
                "stderr": take_buf(&self.stderr),
            }),
            Ok(None) => json!({
                "status": "running",
                "command_id": self.command_id,
                "stdout": take_buf(&self.stdout),
                "stderr": take_buf(&self.stderr),
            }),
            Err(e) => json!({
                "status": "unknown",
                "command_id": self.command_id,
                "error": e.to_string(),
            }),
        }
    }

    /// Kill the command and report its final output.
    pub async fn terminate(&mut self) -> Value {
        let _ = self.child.start_kill();
        let exit_code = match self.child.wait().await {
            Ok(status) => status.code().unwrap_or(-1),
            Err(_) => -1,
        };
        json!({
            "status": "terminated",
            "command_id": self.command_id,
            "exit_code": exit_code,
            "stdout": take_buf(&self.stdout),
            "stderr": take_buf(&self.stderr),
        })
    }

    /// Non-blocking completion check. Returns the final report once the
    /// command has exited, `None` while it is still running.
    pub fn try_finished(&mut self) -> Option<Value> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(json!({
                "status": "completed",
                "command_id": self.command_id,
                "command": self.command,
                "exit_code": status.code().unwrap_or(-1),
                "stdout": take_buf(&self.stdout),
                "stderr": take_buf(&self.stderr),
            })),
            _ => None,
        }
    }

    /// Wait for natural completion (used when a Router drains before exit).
    pub async fn wait(&mut self) -> Value {
        let exit_code = match self.child.wait().await {
            Ok(status) => status.code().unwrap_or(-1),
            Err(_) => -1,
        };
        tokio::task::yield_now().await;
        json!({
            "status": "completed",
            "command_id": self.command_id,
            "exit_code": exit_code,
            "stdout": take_buf(&self.stdout),
            "stderr": take_buf(&self.stderr),
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

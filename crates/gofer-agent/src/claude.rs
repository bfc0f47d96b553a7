// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Child-process adapter for the `claude` CLI.
//!
//! Spawns `claude --print --output-format stream-json` and exchanges
//! newline-delimited JSON with it: user turns go in on stdin (one object per
//! line, stdin stays open for steering), events come back on stdout. The CLI
//! runs its own tool loop; per-call safety is enforced by the caller against
//! each decoded `tool_use` event, which is why permission prompts are
//! bypassed at spawn time.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::RunError;

/// Everything needed to start (or resume) an agent process.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub working_dir: PathBuf,
    pub model: String,
    /// Reasoning-token budget; 0 disables the thinking channel.
    pub thinking_budget: u32,
    /// Safety preamble appended to the agent's system prompt.
    pub system_preamble: Option<String>,
    /// Directories the agent may touch, passed as repeated `--add-dir`.
    pub allowed_dirs: Vec<PathBuf>,
    pub mcp_config: Option<PathBuf>,
    /// Resume a previous session by id instead of starting fresh.
    pub resume: Option<String>,
}

/// A running agent child with line-oriented stdout access.
pub struct AgentProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: tokio::io::Lines<BufReader<ChildStdout>>,
    stderr_task: JoinHandle<String>,
}

impl AgentProcess {
    pub fn spawn(opts: &SpawnOptions) -> Result<Self, RunError> {
        let mut cmd = build_command(opts);
        let mut child = cmd
            .spawn()
            .map_err(|e| RunError::AgentSpawn(format!("spawning claude: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RunError::AgentSpawn("no stdin pipe".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunError::AgentSpawn("no stdout pipe".into()))?;

        // Buffer stderr off to the side for crash diagnostics.
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                use tokio::io::AsyncReadExt;
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        debug!(resume = opts.resume.is_some(), model = %opts.model, "agent spawned");
        Ok(Self {
            child,
            stdin: Some(stdin),
            lines: BufReader::new(stdout).lines(),
            stderr_task,
        })
    }

    /// Write one user turn as a JSON line. Stdin stays open afterwards so
    /// steering frames can follow.
    pub async fn send_user(&mut self, content: &str) -> Result<(), RunError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| RunError::Internal("agent stdin already closed".into()))?;
        let line = user_line(content);
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| RunError::AgentProtocol {
                detail: format!("writing to agent stdin: {e}"),
            })?;
        stdin.flush().await.map_err(|e| RunError::AgentProtocol {
            detail: format!("flushing agent stdin: {e}"),
        })
    }

    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.lines.next_line().await
    }

    /// Close stdin so the agent sees end-of-input and finishes the turn.
    pub fn close_stdin(&mut self) {
        self.stdin.take();
    }

    /// Hard abort: close stdin, signal the child, reap it. Errors here are
    /// expected when the final result raced the abort, so they are only
    /// logged.
    pub async fn abort(mut self) {
        self.close_stdin();
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "killing agent after cancel");
        }
        self.stderr_task.abort();
    }

    /// Wait for the child to exit; returns the exit code and buffered stderr.
    pub async fn finish(mut self) -> Result<(i32, String), RunError> {
        self.close_stdin();
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| RunError::Internal(format!("waiting for agent: {e}")))?;
        let stderr = self.stderr_task.await.unwrap_or_default();
        Ok((status.code().unwrap_or(-1), stderr))
    }
}

/// One stdin line carrying a user turn.
fn user_line(content: &str) -> String {
    let mut line = serde_json::json!({
        "type": "user",
        "message": {"role": "user", "content": content},
    })
    .to_string();
    line.push('\n');
    line
}

fn build_command(opts: &SpawnOptions) -> Command {
    let mut cmd = Command::new("claude");
    cmd.args([
        "--print",
        "--verbose",
        "--output-format",
        "stream-json",
        "--input-format",
        "stream-json",
        "--permission-mode",
        "bypassPermissions",
        "--dangerously-skip-permissions",
    ]);
    cmd.arg("--model").arg(&opts.model);

    if let Some(preamble) = &opts.system_preamble {
        cmd.arg("--append-system-prompt").arg(preamble);
    }
    for dir in &opts.allowed_dirs {
        cmd.arg("--add-dir").arg(dir);
    }
    if let Some(mcp) = &opts.mcp_config {
        cmd.arg("--mcp-config").arg(mcp);
    }
    if let Some(id) = &opts.resume {
        cmd.arg("--resume").arg(id);
    }

    cmd.current_dir(&opts.working_dir);
    if opts.thinking_budget > 0 {
        cmd.env("MAX_THINKING_TOKENS", opts.thinking_budget.to_string());
    }
    if let Some(dir) = config_dir_override() {
        cmd.env("CLAUDE_CONFIG_DIR", dir);
    }

    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);
    cmd
}

/// The agent needs a writable config directory. When the home directory is
/// missing or read-only (containers, locked-down service users), point
/// `CLAUDE_CONFIG_DIR` at a scratch location instead. An explicit value in
/// our own environment is always inherited.
fn config_dir_override() -> Option<PathBuf> {
    if std::env::var_os("CLAUDE_CONFIG_DIR").is_some() {
        return None;
    }
    let home_writable = dirs::home_dir()
        .and_then(|h| std::fs::metadata(&h).ok())
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false);
    if home_writable {
        None
    } else {
        Some(std::env::temp_dir().join("gofer-claude-config"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

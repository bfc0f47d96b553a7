// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Numeric identity assigned by the chat platform. Unforgeable by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric conversation id. One active agent session per chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ChatId {
    /// Group and supergroup chats have negative ids on Telegram.
    pub fn is_group(&self) -> bool {
        self.0 < 0
    }
}

/// Per-user request throttling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateConfig {
    pub enabled: bool,
    /// Bucket capacity: how many requests fit in one window.
    pub requests: u32,
    /// Refill window in seconds.
    pub window_secs: u64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests: 10,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub path: PathBuf,
    /// One JSON object per line instead of the human-readable block format.
    pub json: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/tmp/gofer-audit.log"),
            json: false,
        }
    }
}

/// Reasoning-token budgets, selected per query by keyword match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingConfig {
    /// Budget when no keyword matches (0 disables the reasoning channel).
    pub default_budget: u32,
    /// Keywords that select the standard budget (10 000 tokens).
    pub keywords: Vec<String>,
    /// Keywords that select the deep budget (50 000 tokens).
    pub deep_keywords: Vec<String>,
}

impl Default for ThinkingConfig {
    fn default() -> Self {
        Self {
            default_budget: 0,
            keywords: vec!["think".into(), "careful".into()],
            deep_keywords: vec!["think hard".into(), "ultrathink".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Keep a spinner message pinned below the streamed output.
    pub spinner_enabled: bool,
    /// Append an elapsed-time footer to the final message.
    pub show_elapsed: bool,
    /// Mark the originating user message with status reactions.
    pub reaction_enabled: bool,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            spinner_enabled: true,
            show_elapsed: true,
            reaction_enabled: true,
        }
    }
}

/// Which ephemeral messages are deleted once a query completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupConfig {
    pub delete_thinking: bool,
    pub delete_tool_status: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// API key for the speech-to-text endpoint. Voice notes are rejected
    /// with a short error when unset.
    pub api_key: Option<String>,
    /// OpenAI-compatible `audio/transcriptions` endpoint override.
    pub endpoint: Option<String>,
}

/// Fully normalized service configuration. Environment variables are the
/// external contract; they are read exactly once by [`crate::from_env`] and
/// never consulted again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bot API token (required).
    pub bot_token: String,
    /// Allowlisted principals (required, non-empty).
    pub allowed_users: Vec<UserId>,
    /// Directory the agent works in and that session files are keyed by.
    pub working_dir: PathBuf,
    /// Directories the agent may read and write, beyond `working_dir`.
    pub allowed_paths: Vec<PathBuf>,
    /// Scratch directory for downloaded media. Always readable by the agent.
    pub temp_dir: PathBuf,
    /// Model alias forwarded to the agent process.
    pub model: String,
    /// Optional path to the typed MCP tool-server config file.
    pub mcp_config: Option<PathBuf>,
    /// Shell commands containing any of these substrings are refused.
    pub blocked_patterns: Vec<String>,
    /// Soft wall-clock ceiling for one query, in seconds.
    pub query_timeout_secs: u64,
    #[serde(default)]
    pub rate: RateConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub thinking: ThinkingConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
}

impl Config {
    /// A config suitable for tests: one allowed user, temp working dir.
    pub fn for_tests(working_dir: PathBuf) -> Self {
        Self {
            bot_token: "test-token".into(),
            allowed_users: vec![UserId(1)],
            allowed_paths: vec![working_dir.clone()],
            working_dir,
            temp_dir: PathBuf::from("/tmp/gofer"),
            model: "sonnet".into(),
            mcp_config: None,
            blocked_patterns: default_blocked_patterns(),
            query_timeout_secs: 180,
            rate: RateConfig::default(),
            audit: AuditConfig::default(),
            thinking: ThinkingConfig::default(),
            progress: ProgressConfig::default(),
            cleanup: CleanupConfig::default(),
            transcription: TranscriptionConfig::default(),
        }
    }
}

/// Command substrings that are always refused, regardless of configuration.
pub(crate) fn default_blocked_patterns() -> Vec<String> {
    [
        "rm -rf /",
        "rm -rf ~",
        "mkfs",
        "dd if=",
        ":(){ :|:& };:",
        "> /dev/sda",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

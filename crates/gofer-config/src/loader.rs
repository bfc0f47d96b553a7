// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use anyhow::{bail, Context};
use tracing::debug;

use crate::schema::{
    default_blocked_patterns, AuditConfig, CleanupConfig, Config, ProgressConfig, RateConfig,
    ThinkingConfig, TranscriptionConfig, UserId,
};

/// Source of environment variables. The process environment in production;
/// a map in tests so they never mutate global state.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for std::collections::HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Read the `GOFER_*` environment contract once and normalize it into a
/// [`Config`]. Missing required variables are fatal.
pub fn from_env() -> anyhow::Result<Config> {
    from_source(&ProcessEnv)
}

pub fn from_source(env: &dyn EnvSource) -> anyhow::Result<Config> {
    let bot_token = env
        .get("GOFER_BOT_TOKEN")
        .context("GOFER_BOT_TOKEN is required")?;

    let allowed_users = parse_user_csv(
        &env.get("GOFER_ALLOWED_USERS")
            .context("GOFER_ALLOWED_USERS is required")?,
    )?;
    if allowed_users.is_empty() {
        bail!("GOFER_ALLOWED_USERS must list at least one user id");
    }

    let working_dir = match env.get("GOFER_WORKING_DIR") {
        Some(d) => expand_path(&d),
        None => std::env::current_dir().context("resolving current directory")?,
    };

    let mut allowed_paths = vec![working_dir.clone()];
    if let Some(csv) = env.get("GOFER_ALLOWED_PATHS") {
        for part in csv.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            allowed_paths.push(expand_path(part));
        }
    }

    let mut blocked_patterns = default_blocked_patterns();
    if let Some(csv) = env.get("GOFER_BLOCKED_PATTERNS") {
        for part in csv.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            blocked_patterns.push(part.to_string());
        }
    }

    let config = Config {
        bot_token,
        allowed_users,
        working_dir,
        allowed_paths,
        temp_dir: env
            .get("GOFER_TEMP_DIR")
            .map(|d| expand_path(&d))
            .unwrap_or_else(|| PathBuf::from("/tmp/gofer")),
        model: env.get("GOFER_MODEL").unwrap_or_else(|| "sonnet".into()),
        mcp_config: env.get("GOFER_MCP_CONFIG").map(|p| expand_path(&p)),
        blocked_patterns,
        query_timeout_secs: parse_or(env, "GOFER_QUERY_TIMEOUT_SECS", 180)?,
        rate: RateConfig {
            enabled: parse_or(env, "GOFER_RATE_LIMIT_ENABLED", true)?,
            requests: parse_or(env, "GOFER_RATE_LIMIT_REQUESTS", 10)?,
            window_secs: parse_or(env, "GOFER_RATE_LIMIT_WINDOW_SECS", 60)?,
        },
        audit: AuditConfig {
            path: env
                .get("GOFER_AUDIT_LOG_PATH")
                .map(|p| expand_path(&p))
                .unwrap_or_else(|| AuditConfig::default().path),
            json: parse_or(env, "GOFER_AUDIT_LOG_JSON", false)?,
        },
        thinking: ThinkingConfig {
            default_budget: parse_or(env, "GOFER_THINKING_BUDGET", 0)?,
            keywords: csv_or(env, "GOFER_THINKING_KEYWORDS", ThinkingConfig::default().keywords),
            deep_keywords: csv_or(
                env,
                "GOFER_THINKING_DEEP_KEYWORDS",
                ThinkingConfig::default().deep_keywords,
            ),
        },
        progress: ProgressConfig {
            spinner_enabled: parse_or(env, "GOFER_PROGRESS_SPINNER", true)?,
            show_elapsed: parse_or(env, "GOFER_PROGRESS_ELAPSED", true)?,
            reaction_enabled: parse_or(env, "GOFER_PROGRESS_REACTIONS", true)?,
        },
        cleanup: CleanupConfig {
            delete_thinking: parse_or(env, "GOFER_DELETE_THINKING", false)?,
            delete_tool_status: parse_or(env, "GOFER_DELETE_TOOL_STATUS", false)?,
        },
        transcription: TranscriptionConfig {
            api_key: env.get("GOFER_TRANSCRIPTION_API_KEY"),
            endpoint: env.get("GOFER_TRANSCRIPTION_ENDPOINT"),
        },
    };

    debug!(
        users = config.allowed_users.len(),
        paths = config.allowed_paths.len(),
        "configuration loaded"
    );
    Ok(config)
}

fn parse_user_csv(csv: &str) -> anyhow::Result<Vec<UserId>> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map(UserId)
                .with_context(|| format!("invalid user id '{s}' in GOFER_ALLOWED_USERS"))
        })
        .collect()
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

fn csv_or(env: &dyn EnvSource, key: &str, default: Vec<String>) -> Vec<String> {
    match env.get(key) {
        Some(csv) => csv
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => default,
    }
}

fn parse_or<T: std::str::FromStr>(env: &dyn EnvSource, key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env.get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}")),
        None => Ok(default),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

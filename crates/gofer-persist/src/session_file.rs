// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use gofer_agent::{SessionState, SessionStore, UsageTotals};

/// On-disk checkpoint layout. The camelCase counter names are the contract
/// with earlier deployments of this service; keep them.
#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    session_id: Option<String>,
    saved_at: DateTime<Utc>,
    working_dir: PathBuf,
    #[serde(rename = "totalInputTokens")]
    total_input_tokens: u64,
    #[serde(rename = "totalOutputTokens")]
    total_output_tokens: u64,
    #[serde(rename = "totalCacheRead", default)]
    total_cache_read: u64,
    #[serde(rename = "totalCacheCreate", default)]
    total_cache_create: u64,
    #[serde(rename = "totalQueries")]
    total_queries: u64,
    #[serde(rename = "sessionStartTime")]
    session_start_time: DateTime<Utc>,
}

/// Writes the session checkpoint to a well-known temp path so a restarted
/// bot can `/resume` where it left off.
#[derive(Debug)]
pub struct SessionFileStore {
    path: PathBuf,
}

impl SessionFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("/tmp/gofer-session.json")
    }

    pub fn save(&self, state: &SessionState) -> anyhow::Result<()> {
        let file = SessionFile {
            session_id: state.session_id.clone(),
            saved_at: Utc::now(),
            working_dir: state.working_dir.clone(),
            total_input_tokens: state.totals.input_tokens,
            total_output_tokens: state.totals.output_tokens,
            total_cache_read: state.totals.cache_read,
            total_cache_create: state.totals.cache_create,
            total_queries: state.totals.queries,
            session_start_time: state.started_at,
        };
        let body = serde_json::to_string_pretty(&file)?;
        std::fs::write(&self.path, body)?;
        debug!(path = %self.path.display(), "session checkpoint written");
        Ok(())
    }

    /// Load the checkpoint, but only when it belongs to `working_dir`.
    pub fn load(&self, working_dir: &Path) -> Option<SessionState> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        let file: SessionFile = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "session checkpoint unreadable");
                return None;
            }
        };
        if file.working_dir != working_dir {
            debug!(
                saved = %file.working_dir.display(),
                current = %working_dir.display(),
                "checkpoint belongs to a different working dir"
            );
            return None;
        }
        let mut state = SessionState::new(file.working_dir);
        state.session_id = file.session_id;
        state.started_at = file.session_start_time;
        state.totals = UsageTotals {
            input_tokens: file.total_input_tokens,
            output_tokens: file.total_output_tokens,
            cache_read: file.total_cache_read,
            cache_create: file.total_cache_create,
            queries: file.total_queries,
        };
        Some(state)
    }

    pub fn clear(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

impl SessionStore for SessionFileStore {
    fn checkpoint(&self, state: &SessionState) {
        if let Err(e) = self.save(state) {
            warn!(error = %e, "session checkpoint failed");
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Save/load hand-off across restarts.
//!
//! Before the agent's context window fills (or on SIGTERM), the session's
//! working state is saved by the agent itself into the repository; a tiny
//! `.last-save-id` marker records which save to restore. On the next
//! startup the marker triggers a synthesized load prompt, and the marker is
//! deleted only after the agent confirms the restore.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Local, Utc};
use regex::Regex;
use tracing::{debug, warn};

/// The agent's restore reply must contain this literal to count as loaded.
pub const LOAD_SENTINEL: &str = "Loaded Context:";

const SAVE_ID_FILE: &str = ".last-save-id";
const RESTART_CONTEXT_DIR: &str = "docs/tasks/save";

fn save_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{8}_\d{6}$").expect("static regex"))
}

/// `YYYYMMDD_HHMMSS`, the only accepted save-id shape.
pub fn is_valid_save_id(id: &str) -> bool {
    save_id_re().is_match(id)
}

pub fn generate_save_id(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

fn save_id_path(working_dir: &Path) -> PathBuf {
    working_dir.join(SAVE_ID_FILE)
}

/// Read the marker. An invalid marker is deleted on the spot and the
/// startup proceeds fresh.
pub fn read_save_id(working_dir: &Path) -> Option<String> {
    let path = save_id_path(working_dir);
    let id = std::fs::read_to_string(&path).ok()?.trim().to_string();
    if is_valid_save_id(&id) {
        Some(id)
    } else {
        warn!(%id, "malformed save id, removing marker");
        let _ = std::fs::remove_file(&path);
        None
    }
}

pub fn write_save_id(working_dir: &Path, id: &str) -> anyhow::Result<()> {
    std::fs::write(save_id_path(working_dir), id)?;
    Ok(())
}

/// Delete the marker — call only after the restore was verified.
pub fn clear_save_id(working_dir: &Path) {
    let _ = std::fs::remove_file(save_id_path(working_dir));
}

/// The synthesized prompt that asks the agent to restore a saved context.
/// The reply must echo [`LOAD_SENTINEL`] for the restore to be accepted.
pub fn load_prompt(save_id: &str) -> String {
    format!(
        "Load the saved working context with id {save_id} from {RESTART_CONTEXT_DIR}/ \
         and continue where it left off. Start your reply with the line \
         \"{LOAD_SENTINEL}\" followed by a one-paragraph summary of the restored state."
    )
}

/// The prompt issued automatically once the context budget demands a save.
pub fn save_prompt(save_id: &str) -> String {
    format!(
        "The context window is nearly full. Write a complete hand-off of the current \
         work (task state, decisions, open items, relevant files) to \
         {RESTART_CONTEXT_DIR}/context-{save_id}.md so a fresh session can resume from it. \
         Reply with a one-line confirmation when done."
    )
}

/// Written on SIGTERM so the next session knows what was in flight.
pub fn write_restart_context(
    working_dir: &Path,
    summary: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<PathBuf> {
    let dir = working_dir.join(RESTART_CONTEXT_DIR);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!(
        "restart-context-{}.md",
        now.format("%Y%m%d_%H%M%S")
    ));
    let body = format!(
        "# Restart context\n\nSaved: {}\n\n{summary}\n",
        now.to_rfc3339()
    );
    std::fs::write(&path, body)?;
    debug!(path = %path.display(), "restart context written");
    Ok(path)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

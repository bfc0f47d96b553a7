// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use gofer_config::ChatId;

/// Only a pointer this fresh is honored after a restart.
const RESTART_WINDOW_SECS: i64 = 30;

/// Written on `/restart` so the relaunched process can edit the
/// acknowledgement message instead of leaving it dangling.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestartPointer {
    pub chat_id: ChatId,
    pub message_id: i64,
    pub timestamp: DateTime<Utc>,
}

pub fn default_restart_path() -> PathBuf {
    PathBuf::from("/tmp/gofer-restart.json")
}

pub fn write_restart_pointer(
    path: &Path,
    chat_id: ChatId,
    message_id: i64,
) -> anyhow::Result<()> {
    let pointer = RestartPointer {
        chat_id,
        message_id,
        timestamp: Utc::now(),
    };
    std::fs::write(path, serde_json::to_string(&pointer)?)?;
    Ok(())
}

/// Consume the pointer: return it when fresh, delete the file either way.
pub fn take_recent_restart(path: &Path, now: DateTime<Utc>) -> Option<RestartPointer> {
    let text = std::fs::read_to_string(path).ok()?;
    let _ = std::fs::remove_file(path);
    let pointer: RestartPointer = serde_json::from_str(&text).ok()?;
    if now - pointer.timestamp > Duration::seconds(RESTART_WINDOW_SECS) {
        debug!("restart pointer expired, ignoring");
        return None;
    }
    Some(pointer)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_pointer_round_trips_and_is_consumed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restart.json");
        write_restart_pointer(&path, ChatId(7), 99).unwrap();

        let p = take_recent_restart(&path, Utc::now()).expect("fresh pointer");
        assert_eq!(p.chat_id, ChatId(7));
        assert_eq!(p.message_id, 99);
        assert!(!path.exists(), "pointer file must be consumed");
    }

    #[test]
    fn stale_pointer_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restart.json");
        write_restart_pointer(&path, ChatId(7), 99).unwrap();

        let later = Utc::now() + Duration::seconds(RESTART_WINDOW_SECS + 5);
        assert!(take_recent_restart(&path, later).is_none());
        assert!(!path.exists(), "stale pointer is still deleted");
    }

    #[test]
    fn missing_file_is_none() {
        assert!(take_recent_restart(Path::new("/nonexistent/r.json"), Utc::now()).is_none());
    }
}

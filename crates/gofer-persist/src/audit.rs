// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;
use tracing::warn;

use gofer_agent::{AuditEvent, AuditSink};

/// Append-only audit trail. Two serializations: a human-readable block, or
/// one JSON object per line for log shippers. Write failures are logged and
/// swallowed — auditing must never take the bot down.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    json: bool,
    // Serializes appends so interleaved tasks cannot shear a block.
    lock: Mutex<()>,
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    timestamp: String,
    user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    r#type: &'static str,
    input: &'a str,
    output: &'a str,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
            lock: Mutex::new(()),
        }
    }

    fn format(&self, event: &AuditEvent) -> String {
        if self.json {
            let record = JsonRecord {
                timestamp: event.timestamp.to_rfc3339(),
                user_id: event.user_id.0,
                username: event.username.as_deref(),
                r#type: event.kind.as_str(),
                input: &event.input,
                output: &event.output,
            };
            let mut line =
                serde_json::to_string(&record).unwrap_or_else(|_| String::from("{}"));
            line.push('\n');
            line
        } else {
            let who = match &event.username {
                Some(name) => format!("{} ({name})", event.user_id),
                None => event.user_id.to_string(),
            };
            format!(
                "[{}] user={} type={}\n  input: {}\n  output: {}\n",
                event.timestamp.to_rfc3339(),
                who,
                event.kind.as_str(),
                event.input,
                event.output
            )
        }
    }
}

impl AuditSink for AuditLog {
    fn append(&self, event: AuditEvent) {
        let body = self.format(&event);
        let _guard = self.lock.lock().expect("audit lock poisoned");
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(body.as_bytes()));
        if let Err(e) = result {
            warn!(error = %e, path = %self.path.display(), "audit append failed");
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use gofer_agent::AuditKind;
    use gofer_config::UserId;

    fn event() -> AuditEvent {
        let mut e = AuditEvent::now(UserId(42), AuditKind::ToolUse, "Bash: ls", "allowed");
        e.username = Some("kim".into());
        e
    }

    #[test]
    fn block_format_is_human_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let log = AuditLog::new(&path, false);
        log.append(event());
        log.append(event());

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("user=42 (kim) type=tool_use"));
        assert!(text.contains("  input: Bash: ls"));
        assert_eq!(text.matches("type=tool_use").count(), 2);
    }

    #[test]
    fn json_format_is_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let log = AuditLog::new(&path, true);
        log.append(event());
        log.append(event());

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(v["user_id"], 42);
            assert_eq!(v["type"], "tool_use");
        }
    }

    #[test]
    fn unwritable_path_does_not_panic() {
        let log = AuditLog::new("/nonexistent-dir/audit.log", false);
        log.append(event()); // logged, swallowed
    }
}

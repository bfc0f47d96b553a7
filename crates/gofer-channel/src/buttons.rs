// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! File-based hand-off with the auxiliary button-question server.
//!
//! The server, invoked through the agent's tool channel, writes
//! `<dir>/ask-user-<request_id>.json` with `status: "pending"`. We surface
//! the question as an inline keyboard, flip the file to `"sent"`, and when
//! the user taps an option the callback handler flips it to `"answered"`.
//! The file layout is a contract with that server — do not change it.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use gofer_agent::{ButtonChannel, ButtonRequest};
use gofer_config::ChatId;

const FILE_PREFIX: &str = "ask-user-";

#[derive(Debug, Serialize, Deserialize)]
struct ButtonFile {
    chat_id: i64,
    question: String,
    options: Vec<String>,
    status: String,
}

/// Production [`ButtonChannel`]: scans a shared temp directory.
pub struct FileButtonChannel {
    dir: PathBuf,
}

impl FileButtonChannel {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The well-known location the auxiliary server writes to.
    pub fn default_dir() -> PathBuf {
        PathBuf::from("/tmp")
    }

    fn path_for(&self, request_id: &str) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}{request_id}.json"))
    }

    async fn read(&self, path: &PathBuf) -> Option<(String, ButtonFile)> {
        let name = path.file_name()?.to_str()?;
        let request_id = name
            .strip_prefix(FILE_PREFIX)?
            .strip_suffix(".json")?
            .to_string();
        let text = tokio::fs::read_to_string(path).await.ok()?;
        let parsed: ButtonFile = serde_json::from_str(&text).ok()?;
        Some((request_id, parsed))
    }

    async fn update_status(&self, request_id: &str, status: &str) {
        let path = self.path_for(request_id);
        let Ok(text) = tokio::fs::read_to_string(&path).await else {
            warn!(request_id, "button file vanished before status update");
            return;
        };
        let Ok(mut parsed) = serde_json::from_str::<ButtonFile>(&text) else {
            warn!(request_id, "button file unreadable during status update");
            return;
        };
        parsed.status = status.to_string();
        match serde_json::to_string(&parsed) {
            Ok(body) => {
                if let Err(e) = tokio::fs::write(&path, body).await {
                    warn!(request_id, error = %e, "writing button file");
                }
            }
            Err(e) => warn!(request_id, error = %e, "serializing button file"),
        }
    }

    /// The request currently surfaced (status `"sent"`) for `chat`, if any.
    /// The callback handler uses this to match a button tap back to its
    /// request file.
    pub async fn sent_request(&self, chat: ChatId) -> Option<ButtonRequest> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if let Some((request_id, parsed)) = self.read(&path).await {
                if parsed.status == "sent" && parsed.chat_id == chat.0 {
                    return Some(ButtonRequest {
                        request_id,
                        chat_id: ChatId(parsed.chat_id),
                        question: parsed.question,
                        options: parsed.options,
                    });
                }
            }
        }
        None
    }

    /// Record the user's selection and return the chosen option text.
    /// Called by the callback handler; the text becomes the next prompt.
    pub async fn answer(&self, request_id: &str, option_index: usize) -> Option<String> {
        let path = self.path_for(request_id);
        let (_, parsed) = self.read(&path).await?;
        let choice = parsed.options.get(option_index)?.clone();
        self.update_status(request_id, "answered").await;
        debug!(request_id, %choice, "button answered");
        Some(choice)
    }
}

#[async_trait]
impl ButtonChannel for FileButtonChannel {
    async fn poll(&self, chat: ChatId) -> Option<ButtonRequest> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(FILE_PREFIX) && n.ends_with(".json"))
                .unwrap_or(false)
            {
                continue;
            }
            if let Some((request_id, parsed)) = self.read(&path).await {
                if parsed.status == "pending" && parsed.chat_id == chat.0 {
                    return Some(ButtonRequest {
                        request_id,
                        chat_id: ChatId(parsed.chat_id),
                        question: parsed.question,
                        options: parsed.options,
                    });
                }
            }
        }
        None
    }

    async fn mark_sent(&self, request_id: &str) {
        self.update_status(request_id, "sent").await;
    }
}

/// In-memory [`ButtonChannel`] for tests.
#[derive(Default)]
pub struct MemoryButtonChannel {
    pending: Mutex<Vec<ButtonRequest>>,
    sent: Mutex<Vec<String>>,
}

impl MemoryButtonChannel {
    pub fn push(&self, request: ButtonRequest) {
        self.pending.lock().expect("poisoned").push(request);
    }

    pub fn sent_ids(&self) -> Vec<String> {
        self.sent.lock().expect("poisoned").clone()
    }
}

#[async_trait]
impl ButtonChannel for MemoryButtonChannel {
    async fn poll(&self, chat: ChatId) -> Option<ButtonRequest> {
        let pending = self.pending.lock().expect("poisoned");
        pending.iter().find(|r| r.chat_id == chat).cloned()
    }

    async fn mark_sent(&self, request_id: &str) {
        let mut pending = self.pending.lock().expect("poisoned");
        pending.retain(|r| r.request_id != request_id);
        self.sent
            .lock()
            .expect("poisoned")
            .push(request_id.to_string());
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

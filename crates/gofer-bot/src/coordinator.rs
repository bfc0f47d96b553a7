// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use gofer_config::{ChatId, UserId};

/// How messages are routed after authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Serialized per chat, in arrival order.
    Normal,
    /// `/command` — bypasses the serializer.
    Command,
    /// `!text` — interrupt; bypasses the serializer.
    Interrupt,
}

/// Classify a text message. Commands and interrupts run concurrently with
/// any in-flight normal message; everything else queues per chat.
pub fn classify(text: &str) -> Route {
    if text.starts_with('/') {
        Route::Command
    } else if text.starts_with('!') {
        Route::Interrupt
    } else {
        Route::Normal
    }
}

/// One keyed mutex per chat: normal messages from the same chat are handled
/// strictly in arrival order, while other chats proceed independently.
#[derive(Debug, Default)]
pub struct ChatSerializer {
    locks: Mutex<HashMap<ChatId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ChatSerializer {
    pub fn lock_for(&self, chat: ChatId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("serializer poisoned");
        Arc::clone(locks.entry(chat).or_default())
    }
}

/// One media item after download, ready to be described to the agent.
#[derive(Debug, Clone)]
pub struct MediaItem {
    pub chat: ChatId,
    pub user: UserId,
    pub message_id: i64,
    pub local_path: std::path::PathBuf,
    pub caption: Option<String>,
}

/// Albums arrive as independent updates sharing a group id. Buffer them for
/// one quiet second, then hand the whole group over as a single prompt.
pub struct MediaGroupBuffer {
    groups: Arc<Mutex<HashMap<String, Vec<MediaItem>>>>,
    flushed: mpsc::Sender<Vec<MediaItem>>,
    settle: Duration,
}

impl MediaGroupBuffer {
    pub fn new(flushed: mpsc::Sender<Vec<MediaItem>>) -> Self {
        Self {
            groups: Arc::new(Mutex::new(HashMap::new())),
            flushed,
            settle: Duration::from_secs(1),
        }
    }

    #[cfg(test)]
    fn with_settle(flushed: mpsc::Sender<Vec<MediaItem>>, settle: Duration) -> Self {
        Self {
            groups: Arc::new(Mutex::new(HashMap::new())),
            flushed,
            settle,
        }
    }

    /// Add one item. The first arrival starts the settle timer; each
    /// further arrival extends it.
    pub fn push(&self, group_id: &str, item: MediaItem) {
        let mut groups = self.groups.lock().expect("media buffer poisoned");
        let entry = groups.entry(group_id.to_string()).or_default();
        let is_first = entry.is_empty();
        entry.push(item);
        drop(groups);

        if is_first {
            let groups = Arc::clone(&self.groups);
            let flushed = self.flushed.clone();
            let group_id = group_id.to_string();
            let settle = self.settle;
            tokio::spawn(async move {
                // Wait until no new item arrived for a full settle window.
                let mut last_len = 0;
                loop {
                    tokio::time::sleep(settle).await;
                    let len = groups
                        .lock()
                        .expect("media buffer poisoned")
                        .get(&group_id)
                        .map(Vec::len)
                        .unwrap_or(0);
                    if len == last_len {
                        break;
                    }
                    last_len = len;
                }
                let items = groups
                    .lock()
                    .expect("media buffer poisoned")
                    .remove(&group_id)
                    .unwrap_or_default();
                if !items.is_empty() {
                    debug!(group = %group_id, items = items.len(), "media group settled");
                    let _ = flushed.send(items).await;
                }
            });
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

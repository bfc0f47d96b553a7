// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use gofer_agent::Session;
use gofer_config::ChatId;

/// Owns one [`Session`] per chat. Chats proceed independently; ordering
/// inside a chat is the serializer's job.
#[derive(Debug)]
pub struct SessionManager {
    working_dir: PathBuf,
    sessions: Mutex<HashMap<ChatId, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, chat: ChatId) -> Arc<Session> {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        Arc::clone(
            sessions
                .entry(chat)
                .or_insert_with(|| Arc::new(Session::new(self.working_dir.clone()))),
        )
    }

    pub fn get(&self, chat: ChatId) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .expect("session map poisoned")
            .get(&chat)
            .cloned()
    }

    /// Any chat with a query in flight?
    pub fn any_processing(&self) -> bool {
        self.sessions
            .lock()
            .expect("session map poisoned")
            .values()
            .any(|s| s.is_processing())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

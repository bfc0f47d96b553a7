// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use gofer_config::ChatId;

/// Reference to a message the bot has sent, for later edits and deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub chat: ChatId,
    pub message_id: i64,
}

/// Reference to a message a user sent (reaction target).
pub type UserMessageRef = MessageHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextMode {
    /// Restricted HTML subset.
    Html,
    /// No entity parsing at all.
    #[default]
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatAction {
    Typing,
}

#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub username: String,
}

/// What the concrete transport can do; the renderer degrades gracefully
/// around anything that is absent.
#[derive(Debug, Clone, Copy)]
pub struct ChatCapabilities {
    pub supports_edit: bool,
    pub supports_reactions: bool,
    pub supports_chat_actions: bool,
    pub supports_inline_keyboards: bool,
    pub max_msg_len: usize,
    pub max_edit_rate_hz: u32,
}

impl Default for ChatCapabilities {
    fn default() -> Self {
        Self {
            supports_edit: true,
            supports_reactions: true,
            supports_chat_actions: true,
            supports_inline_keyboards: true,
            max_msg_len: 4096,
            max_edit_rate_hz: 2,
        }
    }
}

/// Transport failures, normalized across platforms.
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    #[error("rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("transport error: {0}")]
    Other(String),
}

impl ChatError {
    /// True when the platform rejected our HTML markup; the caller should
    /// resend the same visible text without entity parsing.
    pub fn is_markup_rejection(&self) -> bool {
        matches!(self, ChatError::Other(detail) if detail.contains("parse entities"))
    }
}

/// Messaging port. All chat output flows through this; tests substitute an
/// in-memory implementation.
#[async_trait]
pub trait Messaging: Send + Sync {
    fn capabilities(&self) -> ChatCapabilities;

    async fn send_text(
        &self,
        chat: ChatId,
        body: &str,
        mode: TextMode,
    ) -> Result<MessageHandle, ChatError>;

    async fn edit_text(
        &self,
        message: &MessageHandle,
        body: &str,
        mode: TextMode,
    ) -> Result<(), ChatError>;

    async fn delete(&self, message: &MessageHandle) -> Result<(), ChatError>;

    /// Best-effort. `None` clears the reaction.
    async fn set_reaction(
        &self,
        message: &MessageHandle,
        emoji: Option<&str>,
    ) -> Result<(), ChatError>;

    async fn send_keyboard(
        &self,
        chat: ChatId,
        prompt: &str,
        options: &[String],
    ) -> Result<MessageHandle, ChatError>;

    async fn send_chat_action(&self, chat: ChatId, action: ChatAction) -> Result<(), ChatError>;

    /// Fetch a platform file into `dest_dir`; returns the local path.
    async fn download_file(&self, file_ref: &str, dest_dir: &Path) -> Result<PathBuf, ChatError>;

    async fn get_me(&self) -> Result<BotIdentity, ChatError>;

    async fn answer_callback(&self, callback_id: &str) -> Result<(), ChatError>;
}

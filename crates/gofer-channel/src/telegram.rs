// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Telegram adapter for the [`Messaging`] port, on top of teloxide.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    ChatAction as TgChatAction, InlineKeyboardButton, InlineKeyboardMarkup, MessageId,
    ParseMode, ReactionType,
};
use teloxide::{ApiError, RequestError};
use tracing::debug;

use gofer_config::ChatId;

use crate::port::{
    BotIdentity, ChatAction, ChatCapabilities, ChatError, MessageHandle, Messaging, TextMode,
};

pub struct TelegramMessaging {
    bot: Bot,
}

impl TelegramMessaging {
    pub fn new(token: &str) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }
}

fn tg_chat(chat: ChatId) -> teloxide::types::ChatId {
    teloxide::types::ChatId(chat.0)
}

fn map_err(e: RequestError) -> ChatError {
    match e {
        RequestError::RetryAfter(secs) => ChatError::RateLimited {
            retry_after: secs.seconds() as u64,
        },
        RequestError::Api(ApiError::BotBlocked) => ChatError::Forbidden,
        RequestError::Api(ApiError::ChatNotFound)
        | RequestError::Api(ApiError::MessageToEditNotFound)
        | RequestError::Api(ApiError::MessageToDeleteNotFound)
        | RequestError::Api(ApiError::MessageIdInvalid) => ChatError::NotFound,
        RequestError::Api(ApiError::CantParseEntities(detail)) => {
            ChatError::Other(format!("can't parse entities: {detail}"))
        }
        other => ChatError::Other(other.to_string()),
    }
}

#[async_trait]
impl Messaging for TelegramMessaging {
    fn capabilities(&self) -> ChatCapabilities {
        ChatCapabilities {
            supports_edit: true,
            supports_reactions: true,
            supports_chat_actions: true,
            supports_inline_keyboards: true,
            max_msg_len: 4096,
            max_edit_rate_hz: 2,
        }
    }

    async fn send_text(
        &self,
        chat: ChatId,
        body: &str,
        mode: TextMode,
    ) -> Result<MessageHandle, ChatError> {
        let mut req = self.bot.send_message(tg_chat(chat), body);
        if mode == TextMode::Html {
            req = req.parse_mode(ParseMode::Html);
        }
        let msg = req.await.map_err(map_err)?;
        Ok(MessageHandle {
            chat,
            message_id: i64::from(msg.id.0),
        })
    }

    async fn edit_text(
        &self,
        message: &MessageHandle,
        body: &str,
        mode: TextMode,
    ) -> Result<(), ChatError> {
        let mut req = self.bot.edit_message_text(
            tg_chat(message.chat),
            MessageId(message.message_id as i32),
            body,
        );
        if mode == TextMode::Html {
            req = req.parse_mode(ParseMode::Html);
        }
        match req.await {
            Ok(_) => Ok(()),
            // Editing to identical content is not an error worth surfacing.
            Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
            Err(e) => Err(map_err(e)),
        }
    }

    async fn delete(&self, message: &MessageHandle) -> Result<(), ChatError> {
        self.bot
            .delete_message(tg_chat(message.chat), MessageId(message.message_id as i32))
            .await
            .map(|_| ())
            .map_err(map_err)
    }

    async fn set_reaction(
        &self,
        message: &MessageHandle,
        emoji: Option<&str>,
    ) -> Result<(), ChatError> {
        let reactions = match emoji {
            Some(e) => vec![ReactionType::Emoji {
                emoji: e.to_string(),
            }],
            None => Vec::new(),
        };
        self.bot
            .set_message_reaction(tg_chat(message.chat), MessageId(message.message_id as i32))
            .reaction(reactions)
            .await
            .map(|_| ())
            .map_err(map_err)
    }

    async fn send_keyboard(
        &self,
        chat: ChatId,
        prompt: &str,
        options: &[String],
    ) -> Result<MessageHandle, ChatError> {
        // One button per row; callback data is the option index.
        let rows: Vec<Vec<InlineKeyboardButton>> = options
            .iter()
            .enumerate()
            .map(|(i, opt)| vec![InlineKeyboardButton::callback(opt.clone(), i.to_string())])
            .collect();
        let msg = self
            .bot
            .send_message(tg_chat(chat), prompt)
            .reply_markup(InlineKeyboardMarkup::new(rows))
            .await
            .map_err(map_err)?;
        Ok(MessageHandle {
            chat,
            message_id: i64::from(msg.id.0),
        })
    }

    async fn send_chat_action(&self, chat: ChatId, action: ChatAction) -> Result<(), ChatError> {
        let tg_action = match action {
            ChatAction::Typing => TgChatAction::Typing,
        };
        self.bot
            .send_chat_action(tg_chat(chat), tg_action)
            .await
            .map(|_| ())
            .map_err(map_err)
    }

    async fn download_file(&self, file_ref: &str, dest_dir: &Path) -> Result<PathBuf, ChatError> {
        let file = self.bot.get_file(file_ref).await.map_err(map_err)?;
        let name = file
            .path
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .unwrap_or("download.bin");
        let local = dest_dir.join(gofer_safety_name(name));
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| ChatError::Other(format!("creating media dir: {e}")))?;
        let mut out = tokio::fs::File::create(&local)
            .await
            .map_err(|e| ChatError::Other(format!("creating {}: {e}", local.display())))?;
        self.bot
            .download_file(&file.path, &mut out)
            .await
            .map_err(|e| ChatError::Other(format!("downloading {file_ref}: {e}")))?;
        debug!(path = %local.display(), "media downloaded");
        Ok(local)
    }

    async fn get_me(&self) -> Result<BotIdentity, ChatError> {
        let me = self.bot.get_me().await.map_err(map_err)?;
        Ok(BotIdentity {
            username: me.username().to_string(),
        })
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<(), ChatError> {
        self.bot
            .answer_callback_query(callback_id)
            .await
            .map(|_| ())
            .map_err(map_err)
    }
}

/// Keep downloaded file names shell- and filesystem-safe.
fn gofer_safety_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

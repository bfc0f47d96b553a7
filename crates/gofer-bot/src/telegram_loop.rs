// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Transport glue: teloxide updates → [`Inbound`].

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::Message;
use tracing::debug;

use gofer_config::{ChatId, UserId};

use crate::bot::{GoferBot, Inbound};

/// Long-poll updates and feed them to the coordinator until shutdown.
pub async fn run_dispatcher(gofer: Arc<GoferBot>, bot: Bot) {
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_callback_query().endpoint(on_callback));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![gofer])
        .default_handler(|upd| async move {
            debug!(?upd, "unhandled update kind");
        })
        .build();

    dispatcher.dispatch().await;
}

async fn on_message(msg: Message, gofer: Arc<GoferBot>) -> ResponseResult<()> {
    if let Some(inbound) = inbound_from_message(&msg) {
        gofer.handle(inbound).await;
    }
    Ok(())
}

async fn on_callback(q: CallbackQuery, gofer: Arc<GoferBot>) -> ResponseResult<()> {
    let Some(chat) = q.message.as_ref().map(|m| ChatId(m.chat().id.0)) else {
        return Ok(());
    };
    let Some(data) = q.data else {
        return Ok(());
    };
    gofer
        .handle(Inbound::Callback {
            callback_id: q.id,
            chat,
            user: UserId(q.from.id.0 as i64),
            data,
        })
        .await;
    Ok(())
}

fn inbound_from_message(msg: &Message) -> Option<Inbound> {
    let user = UserId(msg.from.as_ref()?.id.0 as i64);
    let chat = ChatId(msg.chat.id.0);
    let message_id = i64::from(msg.id.0);
    let media_group_id = msg.media_group_id().map(String::from);
    let caption = msg.caption().map(String::from);

    if let Some(text) = msg.text() {
        return Some(Inbound::Text {
            chat,
            user,
            message_id,
            text: text.to_string(),
        });
    }
    if let Some(voice) = msg.voice() {
        return Some(Inbound::Voice {
            chat,
            user,
            message_id,
            file_id: voice.file.id.clone(),
        });
    }
    if let Some(photos) = msg.photo() {
        // The largest rendition is last.
        let photo = photos.last()?;
        return Some(Inbound::Photo {
            chat,
            user,
            message_id,
            file_id: photo.file.id.clone(),
            caption,
            media_group_id,
        });
    }
    if let Some(doc) = msg.document() {
        return Some(Inbound::Document {
            chat,
            user,
            message_id,
            file_id: doc.file.id.clone(),
            file_name: doc
                .file_name
                .clone()
                .unwrap_or_else(|| "file.bin".to_string()),
            caption,
            media_group_id,
            size: u64::from(doc.file.size),
        });
    }
    debug!("message kind not handled");
    None
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod bot;
mod coordinator;
mod handlers;
mod media;
mod sessions;
mod telegram_loop;

pub use bot::{GoferBot, Inbound, UNAUTHORIZED_REPLY};
pub use coordinator::{classify, ChatSerializer, MediaGroupBuffer, MediaItem, Route};
pub use media::{NoTranscriber, Transcriber, WhisperHttp};
pub use sessions::SessionManager;
pub use telegram_loop::run_dispatcher;

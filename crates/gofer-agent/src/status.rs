// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use tokio::sync::mpsc;

/// User-visible updates emitted by the session runner, in stream order.
/// The renderer turns these into live-edited chat messages.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// A reasoning excerpt from the agent.
    Thinking { text: String },
    /// A one-line tool invocation status (or a BLOCKED notice).
    Tool { label: String },
    /// In-progress text for a segment; `content` is the whole segment so far.
    Text { segment: u32, content: String },
    /// Final content for a segment. Always precedes any event for the next.
    SegmentEnd { segment: u32, content: String },
    /// The agent asked the user to pick an option; render an inline keyboard.
    AskUser {
        request_id: String,
        question: String,
        options: Vec<String>,
    },
    /// Terminal event. Nothing follows.
    Done,
}

/// Sink for status events. The runner never blocks the decode loop on a slow
/// consumer beyond the channel's buffer.
pub type StatusSink = mpsc::Sender<StatusEvent>;

/// Convenience for tests and fire-and-forget emission.
pub async fn emit(sink: &StatusSink, event: StatusEvent) {
    if sink.send(event).await.is_err() {
        tracing::debug!("status receiver dropped, event discarded");
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Live-edit streaming renderer.
//!
//! Consumes the runner's status events and mutates chat messages: one
//! message per text segment (edited in place as text grows), one per tool
//! status and thinking excerpt, an optional spinner pinned below everything,
//! and a completion footer. Platform rate limits are absorbed with a
//! one-shot "waiting" reaction per request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use gofer_agent::StatusEvent;
use gofer_channel::{ChatError, MessageHandle, Messaging, TextMode};
use gofer_config::{ChatId, CleanupConfig, ProgressConfig};

use crate::markdown::markdown_to_html;

/// Minimum gap between two edits of the same segment message.
const EDIT_THROTTLE: Duration = Duration::from_millis(500);
/// Hard platform ceiling for one message.
const MESSAGE_LIMIT: usize = 4096;
/// Overflow chunks stay under this to leave room for formatting.
const SAFE_CHUNK_LIMIT: usize = 4000;
/// Never sleep longer than this on a rate-limit hint.
const MAX_RATE_LIMIT_SLEEP: Duration = Duration::from_secs(30);
/// Minimum gap between two *new* messages to one chat.
const SEND_GAP: Duration = Duration::from_secs(1);
/// Group chats get a harder cap (≤19 messages per minute).
const GROUP_SEND_GAP: Duration = Duration::from_millis(3200);

/// Reaction emojis (the platform only accepts a fixed set).
pub const REACT_RECEIVED: &str = "👀";
pub const REACT_WORKING: &str = "✍";
pub const REACT_DONE: &str = "👌";
pub const REACT_WAITING: &str = "🥱";
pub const REACT_STEERED: &str = "🤝";

const SPINNER_TEXT: &str = "⏳ working…";

/// Handles created while rendering one request; the caller may need them to
/// clean up after a failed attempt.
#[derive(Debug, Default)]
pub struct RenderReport {
    pub tool_handles: Vec<MessageHandle>,
    pub thinking_handles: Vec<MessageHandle>,
    pub last_segment: Option<MessageHandle>,
}

pub struct StreamRenderer {
    messaging: Arc<dyn Messaging>,
    progress: ProgressConfig,
    cleanup: CleanupConfig,
}

struct RenderState {
    chat: ChatId,
    origin: Option<MessageHandle>,
    segments: HashMap<u32, MessageHandle>,
    last_edit_at: HashMap<u32, Instant>,
    last_sent: HashMap<u32, String>,
    tool_handles: Vec<MessageHandle>,
    thinking_handles: Vec<MessageHandle>,
    spinner: Option<MessageHandle>,
    last_segment: Option<MessageHandle>,
    started: Instant,
    last_send_at: Option<Instant>,
    rate_limited_notified: bool,
}

impl StreamRenderer {
    pub fn new(
        messaging: Arc<dyn Messaging>,
        progress: ProgressConfig,
        cleanup: CleanupConfig,
    ) -> Self {
        Self {
            messaging,
            progress,
            cleanup,
        }
    }

    /// Drain `rx` to completion, rendering every event. Returns the handles
    /// created along the way.
    pub async fn render(
        &self,
        chat: ChatId,
        origin: Option<MessageHandle>,
        mut rx: mpsc::Receiver<StatusEvent>,
    ) -> RenderReport {
        let mut st = RenderState {
            chat,
            origin,
            segments: HashMap::new(),
            last_edit_at: HashMap::new(),
            last_sent: HashMap::new(),
            tool_handles: Vec::new(),
            thinking_handles: Vec::new(),
            spinner: None,
            last_segment: None,
            started: Instant::now(),
            last_send_at: None,
            rate_limited_notified: false,
        };

        self.react(&mut st, REACT_WORKING).await;

        while let Some(event) = rx.recv().await {
            match event {
                StatusEvent::Thinking { text } => self.on_thinking(&mut st, &text).await,
                StatusEvent::Tool { label } => self.on_tool(&mut st, &label).await,
                StatusEvent::Text { segment, content } => {
                    self.on_text(&mut st, segment, &content).await
                }
                StatusEvent::SegmentEnd { segment, content } => {
                    self.on_segment_end(&mut st, segment, &content).await
                }
                StatusEvent::AskUser {
                    question, options, ..
                } => {
                    self.on_ask_user(&mut st, &question, &options).await;
                }
                StatusEvent::Done => {
                    self.on_done(&mut st).await;
                    break;
                }
            }
        }

        RenderReport {
            tool_handles: st.tool_handles,
            thinking_handles: st.thinking_handles,
            last_segment: st.last_segment,
        }
    }

    async fn on_thinking(&self, st: &mut RenderState, text: &str) {
        let body = clip(text, SAFE_CHUNK_LIMIT - 16);
        let html = format!("💭 <i>{}</i>", crate::markdown::escape_html(&body));
        if let Some(handle) = self.send(st, &html, TextMode::Html).await {
            st.thinking_handles.push(handle);
            self.refresh_spinner(st).await;
        }
    }

    async fn on_tool(&self, st: &mut RenderState, label: &str) {
        let html = format!(
            "🔧 <code>{}</code>",
            crate::markdown::escape_html(&clip(label, 256))
        );
        if let Some(handle) = self.send(st, &html, TextMode::Html).await {
            st.tool_handles.push(handle);
            self.refresh_spinner(st).await;
        }
    }

    async fn on_text(&self, st: &mut RenderState, segment: u32, content: &str) {
        if content.len() > MESSAGE_LIMIT {
            // Still streaming past the limit; wait for the final split.
            return;
        }
        let throttled = st
            .last_edit_at
            .get(&segment)
            .map(|t| t.elapsed() < EDIT_THROTTLE)
            .unwrap_or(false);
        if throttled {
            return;
        }
        self.upsert_segment(st, segment, content, false).await;
    }

    async fn on_segment_end(&self, st: &mut RenderState, segment: u32, content: &str) {
        if content.len() > MESSAGE_LIMIT {
            self.split_overflow(st, segment, content).await;
        } else {
            self.upsert_segment(st, segment, content, true).await;
        }
        if let Some(handle) = st.segments.get(&segment) {
            st.last_segment = Some(*handle);
        }
    }

    /// Create or edit the live message for `segment`.
    async fn upsert_segment(&self, st: &mut RenderState, segment: u32, content: &str, fin: bool) {
        let html = markdown_to_html(content);
        if st.last_sent.get(&segment).map(String::as_str) == Some(html.as_str()) {
            return;
        }

        match st.segments.get(&segment).copied() {
            Some(handle) if self.messaging.capabilities().supports_edit => {
                if self
                    .edit(st, &handle, &html, content)
                    .await
                {
                    st.last_edit_at.insert(segment, Instant::now());
                    st.last_sent.insert(segment, html);
                }
            }
            _ => {
                if let Some(handle) = self.send_with_fallback(st, &html, content).await {
                    st.segments.insert(segment, handle);
                    st.last_edit_at.insert(segment, Instant::now());
                    st.last_sent.insert(segment, html);
                    if !fin {
                        self.refresh_spinner(st).await;
                    }
                }
            }
        }
    }

    /// A finalized segment too long for one message: drop the tracked
    /// message and re-send the content as chunks. The last chunk becomes the
    /// tracked handle.
    async fn split_overflow(&self, st: &mut RenderState, segment: u32, content: &str) {
        if let Some(handle) = st.segments.remove(&segment) {
            if let Err(e) = self.messaging.delete(&handle).await {
                debug!(error = %e, "deleting overflowing message");
            }
        }

        let mut last_handle = None;
        for chunk in chunk_text(content, SAFE_CHUNK_LIMIT) {
            let html = markdown_to_html(&chunk);
            if let Some(handle) = self.send_with_fallback(st, &html, &chunk).await {
                last_handle = Some(handle);
            }
        }
        if let Some(handle) = last_handle {
            st.segments.insert(segment, handle);
            st.last_sent.remove(&segment);
            self.refresh_spinner(st).await;
        }
    }

    async fn on_ask_user(&self, st: &mut RenderState, question: &str, options: &[String]) {
        if !self.messaging.capabilities().supports_inline_keyboards {
            // Degrade to a plain numbered list.
            let listed = options
                .iter()
                .enumerate()
                .map(|(i, o)| format!("{}. {o}", i + 1))
                .collect::<Vec<_>>()
                .join("\n");
            let body = format!("{question}\n{listed}");
            self.send(st, &body, TextMode::Plain).await;
            return;
        }
        if let Err(e) = self
            .messaging
            .send_keyboard(st.chat, question, options)
            .await
        {
            warn!(error = %e, "sending inline keyboard");
        }
    }

    async fn on_done(&self, st: &mut RenderState) {
        if let Some(spinner) = st.spinner.take() {
            let _ = self.messaging.delete(&spinner).await;
        }

        if self.progress.show_elapsed {
            self.append_footer(st).await;
        }

        if self.cleanup.delete_thinking {
            for handle in st.thinking_handles.drain(..) {
                let _ = self.messaging.delete(&handle).await;
            }
        }
        if self.cleanup.delete_tool_status {
            for handle in st.tool_handles.drain(..) {
                let _ = self.messaging.delete(&handle).await;
            }
        }

        self.react(st, REACT_DONE).await;
    }

    /// `start → end (mm:ss)` appended to the last segment message.
    async fn append_footer(&self, st: &mut RenderState) {
        let Some(handle) = st.last_segment else {
            return;
        };
        let Some((&segment, _)) = st.segments.iter().find(|(_, h)| **h == handle) else {
            return;
        };
        let Some(previous) = st.last_sent.get(&segment).cloned() else {
            return;
        };

        let elapsed = st.started.elapsed();
        let footer = format!("\n\n<i>{}</i>", format_elapsed_footer(elapsed));
        let body = format!("{previous}{footer}");
        if body.len() <= MESSAGE_LIMIT {
            let _ = self.edit(st, &handle, &body, &body).await;
        }
    }

    async fn refresh_spinner(&self, st: &mut RenderState) {
        if !self.progress.spinner_enabled {
            return;
        }
        if let Some(old) = st.spinner.take() {
            let _ = self.messaging.delete(&old).await;
        }
        st.spinner = self.send(st, SPINNER_TEXT, TextMode::Plain).await;
    }

    async fn react(&self, st: &mut RenderState, emoji: &str) {
        if !self.progress.reaction_enabled || !self.messaging.capabilities().supports_reactions {
            return;
        }
        let Some(origin) = st.origin else { return };
        if let Err(e) = self.messaging.set_reaction(&origin, Some(emoji)).await {
            debug!(error = %e, "setting reaction");
        }
    }

    /// Send a new message, pacing sends and absorbing rate limits.
    async fn send(
        &self,
        st: &mut RenderState,
        body: &str,
        mode: TextMode,
    ) -> Option<MessageHandle> {
        self.pace(st).await;
        match self.messaging.send_text(st.chat, body, mode).await {
            Ok(handle) => {
                st.last_send_at = Some(Instant::now());
                Some(handle)
            }
            Err(e) => {
                self.handle_transport_error(st, &e).await;
                match self.messaging.send_text(st.chat, body, mode).await {
                    Ok(handle) => {
                        st.last_send_at = Some(Instant::now());
                        Some(handle)
                    }
                    Err(e) => {
                        warn!(error = %e, "send failed after retry");
                        None
                    }
                }
            }
        }
    }

    /// Send HTML; if the platform rejects the markup, fall back to plain
    /// text with the same visible content.
    async fn send_with_fallback(
        &self,
        st: &mut RenderState,
        html: &str,
        plain: &str,
    ) -> Option<MessageHandle> {
        self.pace(st).await;
        match self.messaging.send_text(st.chat, html, TextMode::Html).await {
            Ok(handle) => {
                st.last_send_at = Some(Instant::now());
                Some(handle)
            }
            Err(e) if e.is_markup_rejection() => {
                self.send(st, plain, TextMode::Plain).await
            }
            Err(e) => {
                self.handle_transport_error(st, &e).await;
                self.send(st, html, TextMode::Html).await
            }
        }
    }

    /// Edit with markup fallback. Returns true when some edit succeeded.
    async fn edit(
        &self,
        st: &mut RenderState,
        handle: &MessageHandle,
        html: &str,
        plain: &str,
    ) -> bool {
        match self.messaging.edit_text(handle, html, TextMode::Html).await {
            Ok(()) => true,
            Err(e) if e.is_markup_rejection() => self
                .messaging
                .edit_text(handle, plain, TextMode::Plain)
                .await
                .is_ok(),
            Err(e) => {
                self.handle_transport_error(st, &e).await;
                self.messaging
                    .edit_text(handle, html, TextMode::Html)
                    .await
                    .is_ok()
            }
        }
    }

    /// First 429 in a request flips a "waiting" reaction on the user's
    /// message; afterwards we just sleep out the hint quietly.
    async fn handle_transport_error(&self, st: &mut RenderState, error: &ChatError) {
        if let ChatError::RateLimited { retry_after } = error {
            if !st.rate_limited_notified {
                st.rate_limited_notified = true;
                warn!(retry_after, "chat transport rate limited");
                self.react(st, REACT_WAITING).await;
            }
            let wait = Duration::from_secs(*retry_after).min(MAX_RATE_LIMIT_SLEEP);
            tokio::time::sleep(wait).await;
        } else {
            debug!(%error, "chat transport error");
        }
    }

    async fn pace(&self, st: &RenderState) {
        let gap = if st.chat.is_group() {
            GROUP_SEND_GAP
        } else {
            SEND_GAP
        };
        if let Some(last) = st.last_send_at {
            let elapsed = last.elapsed();
            if elapsed < gap {
                tokio::time::sleep(gap - elapsed).await;
            }
        }
    }
}

/// Split on char boundaries into chunks of at most `limit` bytes, preferring
/// newline boundaries.
fn chunk_text(content: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = content;
    while rest.len() > limit {
        let mut cut = limit;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let window = &rest[..cut];
        let split = window.rfind('\n').filter(|i| *i > limit / 2).unwrap_or(cut);
        chunks.push(rest[..split].to_string());
        rest = rest[split..].trim_start_matches('\n');
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

fn clip(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &text[..cut])
}

/// `start → end (mm:ss)` in local wall-clock time.
fn format_elapsed_footer(elapsed: Duration) -> String {
    let end = chrono::Local::now();
    let start = end - chrono::Duration::from_std(elapsed).unwrap_or_default();
    let mins = elapsed.as_secs() / 60;
    let secs = elapsed.as_secs() % 60;
    format!(
        "{} → {} ({mins:02}:{secs:02})",
        start.format("%H:%M"),
        end.format("%H:%M")
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use gofer_channel::{BotIdentity, ChatAction, ChatCapabilities};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Send { body: String, mode: TextMode },
        Edit { id: i64, body: String },
        Delete { id: i64 },
        Reaction { emoji: Option<String> },
        Keyboard { prompt: String, options: Vec<String> },
    }

    #[derive(Default)]
    struct MockMessaging {
        calls: Mutex<Vec<Call>>,
        next_id: AtomicI64,
        /// Errors returned by the next N send/edit calls.
        fail_with: Mutex<Vec<ChatError>>,
    }

    impl MockMessaging {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn queue_failure(&self, e: ChatError) {
            self.fail_with.lock().unwrap().push(e);
        }

        fn take_failure(&self) -> Option<ChatError> {
            let mut q = self.fail_with.lock().unwrap();
            if q.is_empty() {
                None
            } else {
                Some(q.remove(0))
            }
        }
    }

    #[async_trait]
    impl Messaging for MockMessaging {
        fn capabilities(&self) -> ChatCapabilities {
            ChatCapabilities::default()
        }

        async fn send_text(
            &self,
            _chat: ChatId,
            body: &str,
            mode: TextMode,
        ) -> Result<MessageHandle, ChatError> {
            if let Some(e) = self.take_failure() {
                return Err(e);
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.calls.lock().unwrap().push(Call::Send {
                body: body.to_string(),
                mode,
            });
            Ok(MessageHandle {
                chat: ChatId(1),
                message_id: id,
            })
        }

        async fn edit_text(
            &self,
            message: &MessageHandle,
            body: &str,
            _mode: TextMode,
        ) -> Result<(), ChatError> {
            if let Some(e) = self.take_failure() {
                return Err(e);
            }
            self.calls.lock().unwrap().push(Call::Edit {
                id: message.message_id,
                body: body.to_string(),
            });
            Ok(())
        }

        async fn delete(&self, message: &MessageHandle) -> Result<(), ChatError> {
            self.calls.lock().unwrap().push(Call::Delete {
                id: message.message_id,
            });
            Ok(())
        }

        async fn set_reaction(
            &self,
            _message: &MessageHandle,
            emoji: Option<&str>,
        ) -> Result<(), ChatError> {
            self.calls.lock().unwrap().push(Call::Reaction {
                emoji: emoji.map(String::from),
            });
            Ok(())
        }

        async fn send_keyboard(
            &self,
            _chat: ChatId,
            prompt: &str,
            options: &[String],
        ) -> Result<MessageHandle, ChatError> {
            self.calls.lock().unwrap().push(Call::Keyboard {
                prompt: prompt.to_string(),
                options: options.to_vec(),
            });
            Ok(MessageHandle {
                chat: ChatId(1),
                message_id: 999,
            })
        }

        async fn send_chat_action(
            &self,
            _chat: ChatId,
            _action: ChatAction,
        ) -> Result<(), ChatError> {
            Ok(())
        }

        async fn download_file(
            &self,
            _file_ref: &str,
            _dest_dir: &Path,
        ) -> Result<PathBuf, ChatError> {
            unimplemented!("not used in renderer tests")
        }

        async fn get_me(&self) -> Result<BotIdentity, ChatError> {
            Ok(BotIdentity {
                username: "gofer_bot".into(),
            })
        }

        async fn answer_callback(&self, _callback_id: &str) -> Result<(), ChatError> {
            Ok(())
        }
    }

    fn renderer(mock: Arc<MockMessaging>) -> StreamRenderer {
        StreamRenderer::new(
            mock,
            ProgressConfig {
                spinner_enabled: false,
                show_elapsed: false,
                reaction_enabled: false,
            },
            CleanupConfig::default(),
        )
    }

    async fn run_events(r: &StreamRenderer, events: Vec<StatusEvent>) -> RenderReport {
        let (tx, rx) = mpsc::channel(64);
        for ev in events {
            tx.send(ev).await.unwrap();
        }
        drop(tx);
        r.render(ChatId(1), None, rx).await
    }

    fn sends(calls: &[Call]) -> Vec<&Call> {
        calls
            .iter()
            .filter(|c| matches!(c, Call::Send { .. }))
            .collect()
    }

    // ── Overflow splitting ────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn oversized_segment_splits_into_chunks() {
        let mock = Arc::new(MockMessaging::default());
        let r = renderer(Arc::clone(&mock));

        let big = "line\n".repeat(1660); // 8300 bytes
        let report = run_events(
            &r,
            vec![
                StatusEvent::SegmentEnd {
                    segment: 0,
                    content: big.clone(),
                },
                StatusEvent::Tool {
                    label: "Bash: ls".into(),
                },
                StatusEvent::SegmentEnd {
                    segment: 1,
                    content: "tail".repeat(50),
                },
                StatusEvent::Done,
            ],
        )
        .await;

        let calls = mock.calls();
        let send_bodies: Vec<String> = calls
            .iter()
            .filter_map(|c| match c {
                Call::Send { body, .. } => Some(body.clone()),
                _ => None,
            })
            .collect();
        // 3 chunks for segment 0, one tool status, one message for segment 1.
        assert_eq!(send_bodies.len(), 5);
        for chunk in &send_bodies[..3] {
            assert!(chunk.len() <= SAFE_CHUNK_LIMIT);
        }
        assert!(report.last_segment.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_reassemble_to_original_content() {
        let content = "abc\n".repeat(3000);
        let chunks = chunk_text(&content, SAFE_CHUNK_LIMIT);
        assert!(chunks.len() >= 3);
        let rejoined: String = chunks.join("\n");
        // Same visible characters modulo the newline trimming at cut points.
        assert_eq!(
            rejoined.replace('\n', ""),
            content.replace('\n', "")
        );
    }

    // ── Coalescing ────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn identical_content_is_not_resent() {
        let mock = Arc::new(MockMessaging::default());
        let r = renderer(Arc::clone(&mock));

        run_events(
            &r,
            vec![
                StatusEvent::Text {
                    segment: 0,
                    content: "same words here".into(),
                },
                StatusEvent::SegmentEnd {
                    segment: 0,
                    content: "same words here".into(),
                },
                StatusEvent::Done,
            ],
        )
        .await;

        let calls = mock.calls();
        assert_eq!(sends(&calls).len(), 1, "no duplicate send/edit: {calls:?}");
        assert!(!calls.iter().any(|c| matches!(c, Call::Edit { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn growing_segment_is_edited_in_place() {
        let mock = Arc::new(MockMessaging::default());
        let r = renderer(Arc::clone(&mock));

        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn({
            let r_chat = ChatId(1);
            async move { r.render(r_chat, None, rx).await }
        });

        tx.send(StatusEvent::Text {
            segment: 0,
            content: "first part".into(),
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        tx.send(StatusEvent::Text {
            segment: 0,
            content: "first part and more".into(),
        })
        .await
        .unwrap();
        tx.send(StatusEvent::SegmentEnd {
            segment: 0,
            content: "first part and more, done".into(),
        })
        .await
        .unwrap();
        tx.send(StatusEvent::Done).await.unwrap();
        drop(tx);
        let _ = handle.await.unwrap();

        let calls = mock.calls();
        assert_eq!(sends(&calls).len(), 1);
        let edits = calls
            .iter()
            .filter(|c| matches!(c, Call::Edit { .. }))
            .count();
        assert!(edits >= 1, "expected in-place edits, got {calls:?}");
    }

    // ── Rate-limit escalation ─────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn first_429_sets_waiting_reaction_second_stays_quiet() {
        let mock = Arc::new(MockMessaging::default());
        let r = StreamRenderer::new(
            Arc::clone(&mock) as _,
            ProgressConfig {
                spinner_enabled: false,
                show_elapsed: false,
                reaction_enabled: true,
            },
            CleanupConfig::default(),
        );
        mock.queue_failure(ChatError::RateLimited { retry_after: 12 });

        let origin = MessageHandle {
            chat: ChatId(1),
            message_id: 7,
        };
        let (tx, rx) = mpsc::channel(16);
        tx.send(StatusEvent::SegmentEnd {
            segment: 0,
            content: "first".into(),
        })
        .await
        .unwrap();
        tx.send(StatusEvent::Done).await.unwrap();
        drop(tx);
        // Queue a second failure for a later call within the same request.
        mock.queue_failure(ChatError::RateLimited { retry_after: 12 });
        r.render(ChatId(1), Some(origin), rx).await;

        let waiting = mock
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Reaction { emoji: Some(e) } if e == REACT_WAITING))
            .count();
        assert_eq!(waiting, 1, "exactly one waiting reaction");
    }

    // ── Cleanup ───────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn ephemeral_messages_deleted_on_done_when_configured() {
        let mock = Arc::new(MockMessaging::default());
        let r = StreamRenderer::new(
            Arc::clone(&mock) as _,
            ProgressConfig {
                spinner_enabled: false,
                show_elapsed: false,
                reaction_enabled: false,
            },
            CleanupConfig {
                delete_thinking: true,
                delete_tool_status: true,
            },
        );

        run_events(
            &r,
            vec![
                StatusEvent::Thinking {
                    text: "pondering".into(),
                },
                StatusEvent::Tool {
                    label: "Read: /x".into(),
                },
                StatusEvent::SegmentEnd {
                    segment: 0,
                    content: "kept".into(),
                },
                StatusEvent::Done,
            ],
        )
        .await;

        let calls = mock.calls();
        let deletes = calls
            .iter()
            .filter(|c| matches!(c, Call::Delete { .. }))
            .count();
        assert_eq!(deletes, 2, "thinking + tool deleted, text kept: {calls:?}");
    }

    // ── Keyboard ──────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn ask_user_renders_inline_keyboard() {
        let mock = Arc::new(MockMessaging::default());
        let r = renderer(Arc::clone(&mock));

        run_events(
            &r,
            vec![
                StatusEvent::AskUser {
                    request_id: "r1".into(),
                    question: "Which env?".into(),
                    options: vec!["staging".into(), "production".into()],
                },
                StatusEvent::Done,
            ],
        )
        .await;

        assert!(mock.calls().iter().any(|c| matches!(
            c,
            Call::Keyboard { prompt, options }
                if prompt == "Which env?" && options.len() == 2
        )));
    }

    // ── Chunking helper ───────────────────────────────────────────────────────

    #[test]
    fn chunk_text_respects_limit_and_char_boundaries() {
        let content = "ü".repeat(3000); // 2 bytes each
        let chunks = chunk_text(&content, 4000);
        assert_eq!(chunks.len(), 2);
        for c in &chunks {
            assert!(c.len() <= 4000);
        }
    }

    #[test]
    fn chunk_text_short_input_is_single_chunk() {
        assert_eq!(chunk_text("hi", 4000), vec!["hi".to_string()]);
    }
}

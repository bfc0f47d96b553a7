// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The coordinator: authenticates, rate-limits, classifies, serializes per
//! chat, and drives queries through the runner/renderer pair.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Notify, Semaphore};
use tracing::{debug, info, warn};

use gofer_agent::{
    AuditEvent, AuditKind, AuditSink, RunError, Session, SessionRunner, SessionStore, StatusEvent,
    SELECTION_PENDING,
};
use gofer_channel::{
    ChatAction, ChatError, FileButtonChannel, MessageHandle, Messaging, TextMode,
};
use gofer_config::{ChatId, Config, UserId};
use gofer_persist::{
    clear_save_id, generate_save_id, load_prompt, read_save_id, save_prompt, take_recent_restart,
    write_save_id, SessionFileStore, LOAD_SENTINEL,
};
use gofer_render::{RenderReport, StreamRenderer, REACT_RECEIVED, REACT_STEERED};
use gofer_safety::{RateDecision, SafetyKernel};
use gofer_scheduler::{CronQueue, PendingRun, Scheduler};

use crate::coordinator::{classify, ChatSerializer, MediaGroupBuffer, MediaItem, Route};
use crate::media::{self, Transcriber};
use crate::sessions::SessionManager;

/// Concurrent media downloads across all chats.
const MAX_CONCURRENT_DOWNLOADS: usize = 25;
/// How long an interrupt waits for the previous query to wind down.
const INTERRUPT_GRACE: Duration = Duration::from_secs(2);
/// Typing indicator refresh (the platform expires it after ~5 s).
const TYPING_REFRESH: Duration = Duration::from_secs(4);

pub const UNAUTHORIZED_REPLY: &str = "Unauthorized. Contact the bot owner for access.";

/// One normalized inbound update from the chat transport.
#[derive(Debug, Clone)]
pub enum Inbound {
    Text {
        chat: ChatId,
        user: UserId,
        message_id: i64,
        text: String,
    },
    Voice {
        chat: ChatId,
        user: UserId,
        message_id: i64,
        file_id: String,
    },
    Photo {
        chat: ChatId,
        user: UserId,
        message_id: i64,
        file_id: String,
        caption: Option<String>,
        media_group_id: Option<String>,
    },
    Document {
        chat: ChatId,
        user: UserId,
        message_id: i64,
        file_id: String,
        file_name: String,
        caption: Option<String>,
        media_group_id: Option<String>,
        size: u64,
    },
    Callback {
        callback_id: String,
        chat: ChatId,
        user: UserId,
        data: String,
    },
}

impl Inbound {
    pub fn ids(&self) -> (UserId, ChatId) {
        match self {
            Inbound::Text { chat, user, .. }
            | Inbound::Voice { chat, user, .. }
            | Inbound::Photo { chat, user, .. }
            | Inbound::Document { chat, user, .. }
            | Inbound::Callback { chat, user, .. } => (*user, *chat),
        }
    }

    fn describe(&self) -> String {
        match self {
            Inbound::Text { text, .. } => text.chars().take(200).collect(),
            Inbound::Voice { .. } => "[voice message]".into(),
            Inbound::Photo { .. } => "[photo]".into(),
            Inbound::Document { file_name, .. } => format!("[document: {file_name}]"),
            Inbound::Callback { data, .. } => format!("[callback: {data}]"),
        }
    }
}

pub struct GoferBot {
    pub(crate) config: Arc<Config>,
    pub(crate) kernel: Arc<SafetyKernel>,
    pub(crate) messaging: Arc<dyn Messaging>,
    pub(crate) runner: SessionRunner,
    pub(crate) renderer: Arc<StreamRenderer>,
    pub(crate) sessions: SessionManager,
    pub(crate) serializer: ChatSerializer,
    pub(crate) store: Arc<SessionFileStore>,
    pub(crate) audit: Arc<dyn AuditSink>,
    pub(crate) buttons: Arc<FileButtonChannel>,
    pub(crate) transcriber: Arc<dyn Transcriber>,
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) cron_queue: Arc<CronQueue>,
    cron_tx: mpsc::Sender<PendingRun>,
    cron_rx: Mutex<Option<mpsc::Receiver<PendingRun>>>,
    media_buffer: MediaGroupBuffer,
    media_rx: Mutex<Option<mpsc::Receiver<Vec<MediaItem>>>>,
    download_slots: Arc<Semaphore>,
    /// Save id found at startup, consumed by the first query.
    pending_restore: Mutex<Option<String>>,
    /// The chat cron output goes to (the most recent authorized chat).
    last_chat: Mutex<Option<ChatId>>,
    shutdown: Notify,
    shutdown_requested: AtomicBool,
}

impl GoferBot {
    pub fn new(
        config: Arc<Config>,
        messaging: Arc<dyn Messaging>,
        audit: Arc<dyn AuditSink>,
        transcriber: Arc<dyn Transcriber>,
    ) -> Arc<Self> {
        let kernel = Arc::new(SafetyKernel::from_config(&config));
        let store = Arc::new(SessionFileStore::new(SessionFileStore::default_path()));
        let buttons = Arc::new(FileButtonChannel::new(FileButtonChannel::default_dir()));
        let button_port: Arc<dyn gofer_agent::ButtonChannel> = Arc::clone(&buttons) as _;
        let store_port: Arc<dyn gofer_agent::SessionStore> = Arc::clone(&store) as _;
        let runner = SessionRunner::new(
            Arc::clone(&config),
            Arc::clone(&kernel),
            button_port,
            store_port,
            Arc::clone(&audit),
        );
        let renderer = Arc::new(StreamRenderer::new(
            Arc::clone(&messaging),
            config.progress.clone(),
            config.cleanup.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(config.working_dir.join("cron.yaml")));
        let cron_queue = scheduler.queue();
        let (cron_tx, cron_rx) = mpsc::channel(8);
        let (media_tx, media_rx) = mpsc::channel(8);

        Arc::new(Self {
            sessions: SessionManager::new(config.working_dir.clone()),
            serializer: ChatSerializer::default(),
            media_buffer: MediaGroupBuffer::new(media_tx),
            media_rx: Mutex::new(Some(media_rx)),
            cron_tx,
            cron_rx: Mutex::new(Some(cron_rx)),
            download_slots: Arc::new(Semaphore::new(MAX_CONCURRENT_DOWNLOADS)),
            pending_restore: Mutex::new(None),
            last_chat: Mutex::new(None),
            shutdown: Notify::new(),
            shutdown_requested: AtomicBool::new(false),
            config,
            kernel,
            messaging,
            runner,
            renderer,
            store,
            audit,
            buttons,
            transcriber,
            scheduler,
            cron_queue,
        })
    }

    /// One-time startup work: media dir, restart acknowledgement, save
    /// hand-off detection. A temp dir that cannot be created is fatal.
    pub async fn startup(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.config.temp_dir).map_err(|e| {
            anyhow::anyhow!(
                "cannot create temp dir {}: {e}",
                self.config.temp_dir.display()
            )
        })?;

        if let Some(pointer) =
            take_recent_restart(&gofer_persist::default_restart_path(), Utc::now())
        {
            let handle = MessageHandle {
                chat: pointer.chat_id,
                message_id: pointer.message_id,
            };
            if let Err(e) = self
                .messaging
                .edit_text(&handle, "Bot restarted", TextMode::Plain)
                .await
            {
                debug!(error = %e, "editing restart acknowledgement");
            }
        }

        if let Some(save_id) = read_save_id(&self.config.working_dir) {
            info!(%save_id, "saved context found, will restore on first query");
            *self.pending_restore.lock().expect("poisoned") = Some(save_id);
        }
        Ok(())
    }

    /// Spawn the scheduler tick, cron consumer, and media-group consumer.
    pub fn start_background(self: &Arc<Self>) {
        let scheduler = Arc::clone(&self.scheduler);
        let sessions_busy: Arc<dyn Fn() -> bool + Send + Sync> = {
            let bot = Arc::clone(self);
            Arc::new(move || bot.sessions.any_processing())
        };
        tokio::spawn(scheduler.run(sessions_busy, self.cron_tx.clone()));

        if let Some(mut rx) = self.cron_rx.lock().expect("poisoned").take() {
            let bot = Arc::clone(self);
            tokio::spawn(async move {
                while let Some(run) = rx.recv().await {
                    bot.execute_cron(run).await;
                }
            });
        }

        if let Some(mut rx) = self.media_rx.lock().expect("poisoned").take() {
            let bot = Arc::clone(self);
            tokio::spawn(async move {
                while let Some(items) = rx.recv().await {
                    bot.handle_media_group(items).await;
                }
            });
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    pub async fn wait_for_shutdown(&self) {
        if self.shutdown_requested.load(Ordering::SeqCst) {
            return;
        }
        self.shutdown.notified().await;
    }

    /// Short description of in-flight work, for the SIGTERM hand-off file.
    pub fn inflight_summary(&self) -> String {
        match self.last_chat.lock().expect("poisoned").as_ref() {
            Some(chat) => match self.sessions.get(*chat) {
                Some(session) => {
                    let state = session.snapshot();
                    format!(
                        "Session {} in {}: {} queries, last message: {}",
                        state.session_id.as_deref().unwrap_or("<fresh>"),
                        state.working_dir.display(),
                        state.totals.queries,
                        state.last_message.as_deref().unwrap_or("<none>")
                    )
                }
                None => "No active session.".into(),
            },
            None => "No chats seen this run.".into(),
        }
    }

    // ── Inbound dispatch ──────────────────────────────────────────────────────

    pub async fn handle(self: Arc<Self>, inbound: Inbound) {
        let (user, chat) = inbound.ids();

        if !self.kernel.is_authorized(user) {
            self.audit.append(AuditEvent::now(
                user,
                AuditKind::Auth,
                inbound.describe(),
                "denied",
            ));
            self.reply(chat, UNAUTHORIZED_REPLY).await;
            return;
        }
        *self.last_chat.lock().expect("poisoned") = Some(chat);
        self.audit.append(AuditEvent::now(
            user,
            AuditKind::Message,
            inbound.describe(),
            "accepted",
        ));

        // Button callbacks complete a request the runner is waiting on;
        // they are never rate limited or serialized.
        if let Inbound::Callback {
            callback_id, data, ..
        } = &inbound
        {
            self.handle_callback(chat, user, callback_id, data).await;
            return;
        }

        if let RateDecision::Retry { after_secs } = self.kernel.rate.check(user) {
            self.audit.append(AuditEvent::now(
                user,
                AuditKind::RateLimit,
                inbound.describe(),
                format!("retry in {after_secs}s"),
            ));
            self.reply(
                chat,
                &format!("Rate limit exceeded. Try again in {after_secs}s."),
            )
            .await;
            return;
        }

        match inbound {
            Inbound::Text {
                chat,
                user,
                message_id,
                text,
            } => self.handle_text(chat, user, message_id, text).await,
            Inbound::Voice {
                chat,
                user,
                message_id,
                file_id,
            } => self.handle_voice(chat, user, message_id, file_id).await,
            Inbound::Photo {
                chat,
                user,
                message_id,
                file_id,
                caption,
                media_group_id,
            } => {
                self.handle_photo(chat, user, message_id, file_id, caption, media_group_id)
                    .await
            }
            Inbound::Document {
                chat,
                user,
                message_id,
                file_id,
                file_name,
                caption,
                media_group_id,
                size,
            } => {
                self.handle_document(
                    chat,
                    user,
                    message_id,
                    file_id,
                    file_name,
                    caption,
                    media_group_id,
                    size,
                )
                .await
            }
            Inbound::Callback { .. } => unreachable!("handled above"),
        }
    }

    async fn handle_text(
        self: &Arc<Self>,
        chat: ChatId,
        user: UserId,
        message_id: i64,
        text: String,
    ) {
        let origin = MessageHandle {
            chat,
            message_id,
        };
        match classify(&text) {
            Route::Command => self.handle_command(chat, user, origin, &text).await,
            Route::Interrupt => {
                let stripped = text.trim_start_matches('!').trim().to_string();
                let session = self.sessions.get_or_create(chat);
                if session.is_processing() {
                    session.set_interrupted();
                    session.stop();
                    wait_for_idle(&session, INTERRUPT_GRACE).await;
                }
                if !stripped.is_empty() {
                    self.run_text_query(chat, user, stripped, Some(origin)).await;
                }
            }
            Route::Normal => {
                let session = self.sessions.get_or_create(chat);
                if session.is_processing() {
                    // Ride along at the next tool boundary instead of queueing.
                    if session.steering.push(text) {
                        self.react(&origin, REACT_STEERED).await;
                    } else {
                        self.reply(chat, "Busy; steering buffer is full, try again shortly.")
                            .await;
                    }
                    return;
                }
                let lock = self.serializer.lock_for(chat);
                let _guard = lock.lock().await;
                self.run_text_query(chat, user, text, Some(origin)).await;
            }
        }
    }

    async fn handle_callback(
        self: &Arc<Self>,
        chat: ChatId,
        user: UserId,
        callback_id: &str,
        data: &str,
    ) {
        if let Err(e) = self.messaging.answer_callback(callback_id).await {
            debug!(error = %e, "answering callback");
        }
        let Some(request) = self.buttons.sent_request(chat).await else {
            debug!("callback without a pending button request");
            return;
        };
        let Ok(index) = data.parse::<usize>() else {
            warn!(data, "malformed callback payload");
            return;
        };
        let Some(choice) = self.buttons.answer(&request.request_id, index).await else {
            return;
        };
        info!(%choice, "button selection received");
        // The selected option becomes the next prompt to the session.
        self.run_text_query(chat, user, choice, None).await;
    }

    // ── Query pipeline ────────────────────────────────────────────────────────

    /// Run one text query end to end: restore hand-off, auto-save, the
    /// query itself (with one retry after an agent crash), then alarms and
    /// deferred cron runs.
    pub(crate) async fn run_text_query(
        self: &Arc<Self>,
        chat: ChatId,
        user: UserId,
        prompt: String,
        origin: Option<MessageHandle>,
    ) {
        self.restore_if_pending(chat, user).await;
        self.auto_save_if_required(chat, user).await;

        if let Some(origin) = &origin {
            self.react(origin, REACT_RECEIVED).await;
        }

        let session = self.sessions.get_or_create(chat);
        let (result, report) = self.attempt_query(&session, chat, user, &prompt, origin).await;

        let result = match result {
            Err(ref e) if e.is_retryable_crash() => {
                warn!(error = %e, "agent crashed, retrying once with a fresh session");
                session
                    .state
                    .lock()
                    .expect("state poisoned")
                    .session_id = None;
                // The failed attempt's tool chatter is stale; remove it.
                for handle in &report.tool_handles {
                    let _ = self.messaging.delete(handle).await;
                }
                let (retry, _report) = self
                    .attempt_query(&session, chat, user, &prompt, origin)
                    .await;
                retry
            }
            other => other,
        };

        match result {
            Ok(text) if text == SELECTION_PENDING => {
                debug!("query paused on user selection");
            }
            Ok(_) => {
                self.post_query(chat).await;
            }
            Err(e) => self.report_error(chat, &session, e).await,
        }
    }

    /// One attempt: renderer task + typing indicator + timeout watchdog
    /// around the runner.
    async fn attempt_query(
        &self,
        session: &Arc<Session>,
        chat: ChatId,
        user: UserId,
        prompt: &str,
        origin: Option<MessageHandle>,
    ) -> (Result<String, RunError>, RenderReport) {
        let (tx, rx) = mpsc::channel::<StatusEvent>(256);
        let renderer = Arc::clone(&self.renderer);
        let render_task = tokio::spawn(async move { renderer.render(chat, origin, rx).await });

        let typing = self.spawn_typing(chat);

        let timed_out = Arc::new(AtomicBool::new(false));
        let watchdog = {
            let session = Arc::clone(session);
            let timed_out = Arc::clone(&timed_out);
            let timeout = Duration::from_secs(self.config.query_timeout_secs);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if session.is_processing() {
                    timed_out.store(true, Ordering::SeqCst);
                    session.stop();
                }
            })
        };

        let result = self.runner.run(session, prompt, user, chat, &tx).await;
        drop(tx);
        watchdog.abort();
        typing.abort();

        let report = render_task.await.unwrap_or_default();
        let result = match result {
            Err(RunError::Cancelled) if timed_out.load(Ordering::SeqCst) => {
                Err(RunError::Timeout)
            }
            other => other,
        };
        (result, report)
    }

    fn spawn_typing(&self, chat: ChatId) -> tokio::task::JoinHandle<()> {
        let messaging = Arc::clone(&self.messaging);
        tokio::spawn(async move {
            if !messaging.capabilities().supports_chat_actions {
                return;
            }
            loop {
                if messaging
                    .send_chat_action(chat, ChatAction::Typing)
                    .await
                    .is_err()
                {
                    return;
                }
                tokio::time::sleep(TYPING_REFRESH).await;
            }
        })
    }

    /// Context alarms and deferred cron runs, after a successful query.
    async fn post_query(self: &Arc<Self>, chat: ChatId) {
        let alarms: Vec<_> = {
            let session = self.sessions.get_or_create(chat);
            let mut state = session.state.lock().expect("state poisoned");
            state.pending_alarms.drain(..).collect()
        };
        for alarm in alarms {
            use gofer_agent::ContextAlarm::*;
            let notice = match alarm {
                Warn70 => "⚠️ Context window is 70% full.",
                Warn85 => "⚠️ Context window is 85% full.",
                Warn95 => "🚨 Context window is 95% full — /new is recommended.",
                SaveRequired => {
                    "💾 Context is nearly full; the current work will be saved before the next query."
                }
            };
            self.reply(chat, notice).await;
        }

        if let Some(next) = self.cron_queue.pop_deferred() {
            let _ = self.cron_tx.send(next).await;
        }
    }

    async fn report_error(&self, chat: ChatId, session: &Arc<Session>, error: RunError) {
        match error {
            RunError::Cancelled => {
                if session.take_interrupted() {
                    debug!("query stopped by interrupt; staying quiet");
                } else {
                    self.reply(chat, "Query stopped.").await;
                }
            }
            RunError::Timeout => {
                self.reply(
                    chat,
                    &format!(
                        "Query timed out after {}s and was stopped.",
                        self.config.query_timeout_secs
                    ),
                )
                .await;
            }
            // The BLOCKED tool status has already been rendered inline.
            RunError::PolicyViolation { reason } => {
                debug!(%reason, "query ended by policy");
            }
            other => {
                self.reply(chat, &format!("Error: {other}")).await;
            }
        }
    }

    // ── Save / restore hand-off ───────────────────────────────────────────────

    /// Restore the saved context on the first query after startup.
    async fn restore_if_pending(&self, chat: ChatId, user: UserId) {
        let save_id = self.pending_restore.lock().expect("poisoned").take();
        let Some(save_id) = save_id else { return };

        self.reply(chat, "Restoring saved context…").await;
        let session = self.sessions.get_or_create(chat);
        let (tx, mut rx) = mpsc::channel::<StatusEvent>(256);
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let result = self
            .runner
            .run(&session, &load_prompt(&save_id), user, chat, &tx)
            .await;
        drop(tx);
        let _ = drain.await;

        match result {
            Ok(text) if text.contains(LOAD_SENTINEL) => {
                // Verified; only now may the marker go away.
                clear_save_id(&self.config.working_dir);
                {
                    let mut state = session.state.lock().expect("state poisoned");
                    state.mark_restored();
                    self.store.checkpoint(&state);
                }
                self.reply(chat, "✅ Previous context restored.").await;
            }
            Ok(_) => {
                warn!("restore reply missing verification line, keeping marker");
                self.reply(chat, "Could not verify the saved context; starting fresh.")
                    .await;
            }
            Err(e) => {
                warn!(error = %e, "context restore failed");
                self.reply(chat, "Could not restore the saved context; starting fresh.")
                    .await;
            }
        }
    }

    /// When the save threshold was crossed, save before running the next
    /// user query.
    async fn auto_save_if_required(&self, chat: ChatId, user: UserId) {
        let session = self.sessions.get_or_create(chat);
        let required = session
            .state
            .lock()
            .expect("state poisoned")
            .flags
            .save_required;
        if !required {
            return;
        }

        let save_id = generate_save_id(chrono::Local::now());
        self.reply(chat, "💾 Saving the current work before continuing…")
            .await;
        let (tx, mut rx) = mpsc::channel::<StatusEvent>(256);
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });
        let result = self
            .runner
            .run(&session, &save_prompt(&save_id), user, chat, &tx)
            .await;
        drop(tx);
        let _ = drain.await;

        match result {
            Ok(_) => {
                if let Err(e) = write_save_id(&self.config.working_dir, &save_id) {
                    warn!(error = %e, "writing save marker");
                } else {
                    let mut state = session.state.lock().expect("state poisoned");
                    state.flags.save_required = false;
                    self.store.checkpoint(&state);
                }
            }
            Err(e) => warn!(error = %e, "auto-save failed"),
        }
    }

    // ── Cron execution ────────────────────────────────────────────────────────

    async fn execute_cron(self: &Arc<Self>, run: PendingRun) {
        if self.sessions.any_processing() || !self.cron_queue.try_lock_execution() {
            self.cron_queue.defer(run);
            return;
        }
        self.cron_queue.record_execution(Utc::now());
        info!(job = %run.job_name, "executing cron job");

        let chat = *self.last_chat.lock().expect("poisoned");
        let Some(chat) = chat else {
            debug!(job = %run.job_name, "no chat seen yet, running job silently");
            self.cron_queue.unlock_execution();
            return;
        };
        let user = self.config.allowed_users[0];

        let session = self.sessions.get_or_create(chat);
        if run.notify {
            let (result, _report) = self
                .attempt_query(&session, chat, user, &run.prompt, None)
                .await;
            if let Err(e) = result {
                warn!(job = %run.job_name, error = %e, "cron job failed");
            }
        } else {
            let (tx, mut rx) = mpsc::channel::<StatusEvent>(256);
            let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });
            if let Err(e) = self.runner.run(&session, &run.prompt, user, chat, &tx).await {
                warn!(job = %run.job_name, error = %e, "cron job failed");
            }
            drop(tx);
            let _ = drain.await;
        }
        self.cron_queue.unlock_execution();

        if let Some(next) = self.cron_queue.pop_deferred() {
            let _ = self.cron_tx.send(next).await;
        }
    }

    // ── Media handling ────────────────────────────────────────────────────────

    async fn handle_voice(
        self: &Arc<Self>,
        chat: ChatId,
        user: UserId,
        message_id: i64,
        file_id: String,
    ) {
        let origin = MessageHandle { chat, message_id };
        let local = match self.download(&file_id).await {
            Ok(path) => path,
            Err(e) => {
                self.reply(chat, &format!("Could not fetch the voice note: {e}"))
                    .await;
                return;
            }
        };
        let bytes = match tokio::fs::read(&local).await {
            Ok(b) => b,
            Err(e) => {
                self.reply(chat, &format!("Could not read the voice note: {e}"))
                    .await;
                return;
            }
        };
        match self.transcriber.transcribe(&bytes).await {
            Ok(text) => {
                self.reply(chat, &format!("🎤 {text}")).await;
                self.run_text_query(chat, user, text, Some(origin)).await;
            }
            Err(e) => {
                self.audit.append(AuditEvent::now(
                    user,
                    AuditKind::Error,
                    "[voice message]",
                    e.to_string(),
                ));
                self.reply(chat, &format!("{e}")).await;
            }
        }
    }

    async fn handle_photo(
        self: &Arc<Self>,
        chat: ChatId,
        user: UserId,
        message_id: i64,
        file_id: String,
        caption: Option<String>,
        media_group_id: Option<String>,
    ) {
        let local = match self.download(&file_id).await {
            Ok(path) => path,
            Err(e) => {
                self.reply(chat, &format!("Could not fetch the photo: {e}"))
                    .await;
                return;
            }
        };
        let item = MediaItem {
            chat,
            user,
            message_id,
            local_path: local,
            caption,
        };
        if let Some(group) = media_group_id {
            self.media_buffer.push(&group, item);
            return;
        }
        let prompt = media::photo_prompt(
            std::slice::from_ref(&item.local_path),
            item.caption.as_deref(),
        );
        let origin = MessageHandle { chat, message_id };
        self.run_text_query(chat, user, prompt, Some(origin)).await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_document(
        self: &Arc<Self>,
        chat: ChatId,
        user: UserId,
        message_id: i64,
        file_id: String,
        file_name: String,
        caption: Option<String>,
        media_group_id: Option<String>,
        size: u64,
    ) {
        if size > media::MAX_DOCUMENT_BYTES {
            self.reply(
                chat,
                &format!(
                    "Document too large ({size} bytes); the limit is {} bytes.",
                    media::MAX_DOCUMENT_BYTES
                ),
            )
            .await;
            return;
        }
        let local = match self.download(&file_id).await {
            Ok(path) => path,
            Err(e) => {
                self.reply(chat, &format!("Could not fetch the document: {e}"))
                    .await;
                return;
            }
        };

        let origin = MessageHandle { chat, message_id };
        let caption_suffix = caption
            .as_deref()
            .map(|c| format!("\n\n{c}"))
            .unwrap_or_default();

        let prompt = if media::is_pdf_name(&file_name) {
            match media::pdf_to_text(&local).await {
                Ok(text) => format!(
                    "The user sent a PDF ({file_name}). Extracted text:\n\n{text}{caption_suffix}"
                ),
                Err(e) => {
                    self.audit.append(AuditEvent::now(
                        user,
                        AuditKind::Error,
                        format!("[document: {file_name}]"),
                        e.to_string(),
                    ));
                    self.reply(chat, &format!("{e}")).await;
                    return;
                }
            }
        } else if media::is_archive_name(&file_name) {
            match media::archive_digest(&local, &self.config.temp_dir) {
                Ok(digest) => format!(
                    "The user sent an archive ({file_name}).\n{digest}{caption_suffix}"
                ),
                Err(e) => {
                    self.audit.append(AuditEvent::now(
                        user,
                        AuditKind::Error,
                        format!("[document: {file_name}]"),
                        e.to_string(),
                    ));
                    self.reply(chat, &format!("{e}")).await;
                    return;
                }
            }
        } else if media_group_id.is_some() {
            // Part of an album of documents: buffer like photos.
            self.media_buffer.push(
                media_group_id.as_deref().unwrap_or_default(),
                MediaItem {
                    chat,
                    user,
                    message_id,
                    local_path: local,
                    caption,
                },
            );
            return;
        } else {
            format!(
                "The user sent a file ({file_name}), saved at {}.{caption_suffix}",
                local.display()
            )
        };

        self.run_text_query(chat, user, prompt, Some(origin)).await;
    }

    async fn handle_media_group(self: &Arc<Self>, items: Vec<MediaItem>) {
        let Some(first) = items.first().cloned() else {
            return;
        };
        let paths: Vec<_> = items.iter().map(|i| i.local_path.clone()).collect();
        let caption = items.iter().find_map(|i| i.caption.clone());
        let prompt = media::photo_prompt(&paths, caption.as_deref());
        let origin = MessageHandle {
            chat: first.chat,
            message_id: first.message_id,
        };
        let lock = self.serializer.lock_for(first.chat);
        let _guard = lock.lock().await;
        self.run_text_query(first.chat, first.user, prompt, Some(origin))
            .await;
    }

    async fn download(&self, file_id: &str) -> Result<std::path::PathBuf, ChatError> {
        let _slot = self
            .download_slots
            .acquire()
            .await
            .map_err(|_| ChatError::Other("download slots closed".into()))?;
        self.messaging
            .download_file(file_id, &self.config.temp_dir)
            .await
    }

    // ── Small helpers ─────────────────────────────────────────────────────────

    pub(crate) async fn reply(&self, chat: ChatId, body: &str) {
        if let Err(e) = self.messaging.send_text(chat, body, TextMode::Plain).await {
            warn!(error = %e, "sending reply");
        }
    }

    pub(crate) async fn react(&self, origin: &MessageHandle, emoji: &str) {
        if !self.config.progress.reaction_enabled {
            return;
        }
        if let Err(e) = self.messaging.set_reaction(origin, Some(emoji)).await {
            debug!(error = %e, "setting reaction");
        }
    }
}

/// Poll until the session's processing flag clears or the grace expires.
pub(crate) async fn wait_for_idle(session: &Arc<Session>, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    while session.is_processing() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

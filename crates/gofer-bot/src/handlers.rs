// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! In-band command surface: `/start /help /new /stop /status /stats
//! /context /resume /restart /retry /cron`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use gofer_agent::CONTEXT_TOKEN_LIMIT;
use gofer_channel::{MessageHandle, TextMode};
use gofer_config::{ChatId, UserId};
use gofer_persist::write_restart_pointer;

use crate::bot::{wait_for_idle, GoferBot};

const HELP_TEXT: &str = "\
Commands:\n\
/new — start a fresh session\n\
/stop — stop the running query\n\
/status — session status\n\
/stats — token usage totals\n\
/context — context window usage\n\
/resume — resume the saved session\n\
/retry — re-run the last message\n\
/restart — restart the bot process\n\
/cron — list scheduled jobs (`/cron reload` re-reads cron.yaml)\n\
\n\
Prefix a message with ! to interrupt the running query.\n\
Messages sent while a query runs are passed along at the next tool step.";

impl GoferBot {
    pub(crate) async fn handle_command(
        self: &Arc<Self>,
        chat: ChatId,
        user: UserId,
        origin: MessageHandle,
        text: &str,
    ) {
        let mut parts = text.split_whitespace();
        let raw_cmd = parts.next().unwrap_or("");
        // Accept "/status@gofer_bot" in group chats.
        let cmd = raw_cmd.split('@').next().unwrap_or(raw_cmd);
        let arg = parts.next().unwrap_or("");

        match cmd {
            "/start" => {
                self.reply(
                    chat,
                    "👋 I bridge this chat to a local coding agent. Send a task, a voice \
                     note, a photo, a PDF, or an archive. /help for commands.",
                )
                .await;
            }
            "/help" => self.reply(chat, HELP_TEXT).await,
            "/stop" => {
                // Silent by design; the stopped query reports itself.
                let _ = self.sessions.get_or_create(chat).stop();
            }
            "/new" => self.cmd_new(chat).await,
            "/status" => self.cmd_status(chat).await,
            "/stats" => self.cmd_stats(chat).await,
            "/context" => self.cmd_context(chat).await,
            "/resume" => self.cmd_resume(chat).await,
            "/restart" => self.cmd_restart(chat).await,
            "/retry" => self.cmd_retry(chat, user, origin).await,
            "/cron" => self.cmd_cron(chat, arg).await,
            other => {
                self.reply(chat, &format!("Unknown command {other}. Try /help."))
                    .await;
            }
        }
    }

    async fn cmd_new(self: &Arc<Self>, chat: ChatId) {
        let session = self.sessions.get_or_create(chat);
        session.stop();
        wait_for_idle(&session, Duration::from_secs(2)).await;
        session.state.lock().expect("state poisoned").reset();
        self.store.clear();
        info!(%chat, "session cleared");
        self.reply(chat, "Started a fresh session.").await;
    }

    async fn cmd_status(&self, chat: ChatId) {
        let Some(session) = self.sessions.get(chat) else {
            self.reply(chat, "No session yet — send a message to start one.")
                .await;
            return;
        };
        let state = session.snapshot();
        let uptime = chrono::Utc::now() - state.started_at;
        let body = format!(
            "Session: {}\nWorking dir: {}\nUptime: {}m\nQueries: {}\nBusy: {}",
            state.session_id.as_deref().unwrap_or("<not started>"),
            state.working_dir.display(),
            uptime.num_minutes(),
            state.totals.queries,
            if session.is_processing() { "yes" } else { "no" },
        );
        self.reply(chat, &body).await;
    }

    async fn cmd_stats(&self, chat: ChatId) {
        let Some(session) = self.sessions.get(chat) else {
            self.reply(chat, "No session yet.").await;
            return;
        };
        let t = session.snapshot().totals;
        let body = format!(
            "Input tokens: {}\nOutput tokens: {}\nCache read: {}\nCache write: {}\nQueries: {}",
            t.input_tokens, t.output_tokens, t.cache_read, t.cache_create, t.queries,
        );
        self.reply(chat, &body).await;
    }

    async fn cmd_context(&self, chat: ChatId) {
        let Some(session) = self.sessions.get(chat) else {
            self.reply(chat, "No session yet.").await;
            return;
        };
        let state = session.snapshot();
        let fraction = state.context_fraction().min(1.0);
        let filled = (fraction * 10.0).round() as usize;
        let bar: String = "█".repeat(filled) + &"░".repeat(10 - filled);
        let body = format!(
            "Context: {bar} {:.0}%\n{} / {} tokens{}",
            fraction * 100.0,
            state.totals.context_tokens(),
            CONTEXT_TOKEN_LIMIT,
            if state.recently_restored {
                "\n(restored session: warnings on cooldown)"
            } else {
                ""
            },
        );
        self.reply(chat, &body).await;
    }

    async fn cmd_resume(&self, chat: ChatId) {
        let session = self.sessions.get_or_create(chat);
        if session.is_processing() {
            self.reply(chat, "A query is running; /stop it before resuming.")
                .await;
            return;
        }
        match self.store.load(&self.config.working_dir) {
            Some(saved) => {
                let summary = format!(
                    "Resumed session {} — {} queries, {} tokens used.",
                    saved.session_id.as_deref().unwrap_or("<fresh>"),
                    saved.totals.queries,
                    saved.totals.context_tokens(),
                );
                *session.state.lock().expect("state poisoned") = saved;
                self.reply(chat, &summary).await;
            }
            None => {
                self.reply(chat, "No saved session for this working directory.")
                    .await;
            }
        }
    }

    async fn cmd_restart(&self, chat: ChatId) {
        match self
            .messaging
            .send_text(chat, "Restarting…", TextMode::Plain)
            .await
        {
            Ok(handle) => {
                if let Err(e) = write_restart_pointer(
                    &gofer_persist::default_restart_path(),
                    chat,
                    handle.message_id,
                ) {
                    warn!(error = %e, "writing restart pointer");
                }
            }
            Err(e) => warn!(error = %e, "sending restart acknowledgement"),
        }
        info!("restart requested; exiting for the supervisor to relaunch");
        self.request_shutdown();
    }

    async fn cmd_retry(self: &Arc<Self>, chat: ChatId, user: UserId, origin: MessageHandle) {
        let last = self
            .sessions
            .get(chat)
            .and_then(|s| s.snapshot().last_message);
        match last {
            Some(prompt) => self.run_text_query(chat, user, prompt, Some(origin)).await,
            None => self.reply(chat, "Nothing to retry yet.").await,
        }
    }

    async fn cmd_cron(&self, chat: ChatId, arg: &str) {
        if arg == "reload" {
            let count = self.scheduler.reload();
            self.reply(chat, &format!("Cron manifest reloaded: {count} job(s)."))
                .await;
            return;
        }
        let jobs = self.scheduler.jobs();
        if jobs.is_empty() {
            self.reply(chat, "No cron jobs configured (cron.yaml).").await;
            return;
        }
        let mut body = String::from("Scheduled jobs:\n");
        for job in jobs {
            body.push_str(&format!(
                "• {} — `{}`{}\n",
                job.name,
                job.schedule,
                if job.enabled { "" } else { " (disabled)" },
            ));
        }
        let pending = self.cron_queue.pending_count();
        if pending > 0 {
            body.push_str(&format!("{pending} run(s) queued behind the session.\n"));
        }
        self.reply(chat, &body).await;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use gofer_config::{ChatId, Config, ThinkingConfig, UserId};
use gofer_safety::{CommandVerdict, SafetyKernel};

use crate::claude::{AgentProcess, SpawnOptions};
use crate::error::RunError;
use crate::events::{decode_line, StreamEvent, Usage};
use crate::ports::{AuditEvent, AuditKind, AuditSink, ButtonChannel, SessionStore};
use crate::session::Session;
use crate::status::{emit, StatusEvent, StatusSink};

/// Returned instead of assistant text when an inline keyboard was surfaced
/// and the turn now waits on the user's selection.
pub const SELECTION_PENDING: &str = "[Waiting for user selection]";

/// Tool names carrying this prefix route through the button-question server.
pub const BUTTON_TOOL_PREFIX: &str = "mcp__ask-user";

/// Minimum gap between two in-progress text emissions for one segment.
const STREAM_THROTTLE: Duration = Duration::from_millis(500);
/// Don't bother emitting partial text shorter than this.
const TEXT_EMIT_FLOOR: usize = 20;
/// Retry delays while waiting for the button server to write its file.
const BUTTON_POLL_DELAYS_MS: [u64; 3] = [200, 100, 100];

/// Appended to the agent's system prompt. Per-call enforcement happens
/// against the decoded stream; this sets expectations up front.
const SAFETY_PREAMBLE: &str = "\
You are operating through a chat bridge on behalf of a remote user.\n\
Stay strictly inside the directories you were given. Never modify files \
elsewhere, never run destructive commands (recursive deletes outside the \
working directory, disk tools, package-manager removals), and never exfiltrate \
secrets. Keep answers compact; they are read on a phone.";

/// Drives one query against the agent process and streams status events.
pub struct SessionRunner {
    config: Arc<Config>,
    kernel: Arc<SafetyKernel>,
    buttons: Arc<dyn ButtonChannel>,
    store: Arc<dyn SessionStore>,
    audit: Arc<dyn AuditSink>,
}

impl SessionRunner {
    pub fn new(
        config: Arc<Config>,
        kernel: Arc<SafetyKernel>,
        buttons: Arc<dyn ButtonChannel>,
        store: Arc<dyn SessionStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            kernel,
            buttons,
            store,
            audit,
        }
    }

    /// Run one query to completion. Returns the concatenated assistant text,
    /// or [`SELECTION_PENDING`] when an inline keyboard was surfaced.
    pub async fn run(
        &self,
        session: &Session,
        prompt: &str,
        actor: UserId,
        chat: ChatId,
        sink: &StatusSink,
    ) -> Result<String, RunError> {
        let control = session.begin_query();
        let result = self
            .run_inner(session, prompt, actor, chat, sink, &control)
            .await;
        session.end_query();
        if let Err(e) = &result {
            self.audit.append(AuditEvent::now(
                actor,
                AuditKind::Error,
                prompt.chars().take(200).collect::<String>(),
                e.to_string(),
            ));
        }
        result
    }

    async fn run_inner(
        &self,
        session: &Session,
        prompt: &str,
        actor: UserId,
        chat: ChatId,
        sink: &StatusSink,
        control: &crate::session::QueryControl,
    ) -> Result<String, RunError> {
        let (resume, fresh) = {
            let mut state = session.state.lock().expect("session state poisoned");
            state.last_message = Some(prompt.to_string());
            (state.session_id.clone(), state.totals.queries == 0)
        };

        if control.stop_requested() {
            return Err(RunError::Cancelled);
        }

        let opts = SpawnOptions {
            working_dir: self.config.working_dir.clone(),
            model: self.config.model.clone(),
            thinking_budget: thinking_budget_for(&self.config.thinking, prompt),
            system_preamble: Some(SAFETY_PREAMBLE.to_string()),
            allowed_dirs: self.config.allowed_paths.clone(),
            mcp_config: self.config.mcp_config.clone(),
            resume: resume.clone(),
        };
        let mut agent = AgentProcess::spawn(&opts)?;
        session.mark_running();

        let input = if fresh && resume.is_none() {
            dated_prompt(prompt)
        } else {
            prompt.to_string()
        };
        agent.send_user(&input).await?;

        let mut turn = QueryTurn::new();

        enum Exit {
            Eof,
            Cancelled,
            ReadErr(std::io::Error),
            Blocked(String),
            Selection,
        }

        let exit = 'stream: loop {
            let line = tokio::select! {
                _ = control.cancel_token().cancelled() => break 'stream Exit::Cancelled,
                line = agent.next_line() => match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break 'stream Exit::Eof,
                    Err(e) => break 'stream Exit::ReadErr(e),
                },
            };

            let events = match decode_line(&line) {
                Ok(events) => events,
                Err(e) => {
                    trace!(error = %e, "skipping non-JSON stream line");
                    continue;
                }
            };

            for event in events {
                match turn.on_event(event, session, &self.config.working_dir, &self.kernel) {
                    Directive::Emit(batch) => {
                        for ev in batch {
                            emit(sink, ev).await;
                        }
                    }
                    Directive::Inject { frame, label, then } => {
                        agent.send_user(&frame).await?;
                        self.audit.append(AuditEvent::now(
                            actor,
                            AuditKind::ToolUse,
                            label,
                            "allowed",
                        ));
                        for ev in then {
                            emit(sink, ev).await;
                        }
                    }
                    Directive::Blocked { notice, reason } => {
                        self.audit.append(AuditEvent::now(
                            actor,
                            AuditKind::ToolUse,
                            notice.clone(),
                            "blocked",
                        ));
                        emit(sink, StatusEvent::Tool { label: notice }).await;
                        break 'stream Exit::Blocked(reason);
                    }
                    Directive::SessionMinted(id) => {
                        let mut state = session.state.lock().expect("session state poisoned");
                        if state.set_session_id(&id) {
                            self.store.checkpoint(&state);
                            debug!(session_id = %id, "session id minted");
                        }
                    }
                    Directive::Completed(usage) => {
                        let mut state = session.state.lock().expect("session state poisoned");
                        let alarms = state.record_usage(&usage);
                        self.store.checkpoint(&state);
                        if !alarms.is_empty() {
                            debug!(?alarms, "context thresholds crossed");
                        }
                    }
                    Directive::ToolStatus { label, events } => {
                        self.audit.append(AuditEvent::now(
                            actor,
                            AuditKind::ToolUse,
                            label,
                            "allowed",
                        ));
                        for ev in events {
                            emit(sink, ev).await;
                        }
                    }
                    Directive::ButtonTool {
                        label,
                        frame,
                        before,
                    } => {
                        if let Some(frame) = &frame {
                            agent.send_user(frame).await?;
                        }
                        self.audit.append(AuditEvent::now(
                            actor,
                            AuditKind::ToolUse,
                            label.clone(),
                            "allowed",
                        ));
                        for ev in before {
                            emit(sink, ev).await;
                        }
                        emit(sink, StatusEvent::Tool { label }).await;
                        if self.surface_buttons(chat, sink).await {
                            break 'stream Exit::Selection;
                        }
                    }
                }
            }
        };

        match exit {
            Exit::Eof => {
                for ev in turn.finalize() {
                    emit(sink, ev).await;
                }
                let (code, stderr) = agent.finish().await?;
                if code != 0 && !turn.completed {
                    warn!(code, stderr = %stderr.trim(), "agent exited abnormally");
                    return Err(RunError::AgentCrash { exit_code: code });
                }
                if code != 0 {
                    warn!(code, "agent exit code after completed result; ignoring");
                }
                Ok(turn.full_text())
            }
            Exit::Cancelled => {
                agent.abort().await;
                if turn.completed {
                    // The final result raced the abort; the query is done.
                    for ev in turn.finalize() {
                        emit(sink, ev).await;
                    }
                    return Ok(turn.full_text());
                }
                Err(RunError::Cancelled)
            }
            Exit::ReadErr(e) => {
                agent.abort().await;
                Err(RunError::AgentProtocol {
                    detail: format!("reading agent stream: {e}"),
                })
            }
            Exit::Blocked(reason) => {
                agent.abort().await;
                Err(RunError::PolicyViolation { reason })
            }
            Exit::Selection => {
                agent.abort().await;
                Ok(SELECTION_PENDING.to_string())
            }
        }
    }

    /// Poll the button channel over a short retry window. When a request for
    /// this chat appears, surface the keyboard and finish the turn. The
    /// segment was already closed at the tool boundary.
    async fn surface_buttons(
        &self,
        chat: ChatId,
        sink: &StatusSink,
    ) -> bool {
        for delay_ms in BUTTON_POLL_DELAYS_MS {
            sleep(Duration::from_millis(delay_ms)).await;
            if let Some(req) = self.buttons.poll(chat).await {
                if req.chat_id != chat {
                    continue;
                }
                emit(
                    sink,
                    StatusEvent::AskUser {
                        request_id: req.request_id.clone(),
                        question: req.question,
                        options: req.options,
                    },
                )
                .await;
                self.buttons.mark_sent(&req.request_id).await;
                emit(sink, StatusEvent::Done).await;
                return true;
            }
        }
        false
    }
}

/// What the runner should do with one decoded event.
enum Directive {
    Emit(Vec<StatusEvent>),
    /// Write a steering frame to the agent, then emit.
    Inject {
        frame: String,
        label: String,
        then: Vec<StatusEvent>,
    },
    Blocked {
        notice: String,
        reason: String,
    },
    SessionMinted(String),
    Completed(Usage),
    ToolStatus {
        label: String,
        events: Vec<StatusEvent>,
    },
    /// A button-question tool call. `before` carries the segment close for
    /// this boundary; `frame` carries any steering due at it.
    ButtonTool {
        label: String,
        frame: Option<String>,
        before: Vec<StatusEvent>,
    },
}

/// Per-query stream state: segmentation, throttling, and completion.
struct QueryTurn {
    segment: u32,
    current: String,
    segments: Vec<String>,
    last_text_emit: Option<Instant>,
    completed: bool,
    done_emitted: bool,
}

impl QueryTurn {
    fn new() -> Self {
        Self {
            segment: 0,
            current: String::new(),
            segments: Vec::new(),
            last_text_emit: None,
            completed: false,
            done_emitted: false,
        }
    }

    fn on_event(
        &mut self,
        event: StreamEvent,
        session: &Session,
        workdir: &Path,
        kernel: &SafetyKernel,
    ) -> Directive {
        match event {
            StreamEvent::SessionInit { session_id } => Directive::SessionMinted(session_id),
            StreamEvent::AssistantThinking { delta } => {
                Directive::Emit(vec![StatusEvent::Thinking { text: delta }])
            }
            StreamEvent::AssistantText { delta } => {
                self.current.push_str(&delta);
                let due = self
                    .last_text_emit
                    .map(|t| t.elapsed() >= STREAM_THROTTLE)
                    .unwrap_or(true);
                if due && self.current.len() > TEXT_EMIT_FLOOR {
                    self.last_text_emit = Some(Instant::now());
                    Directive::Emit(vec![StatusEvent::Text {
                        segment: self.segment,
                        content: self.current.clone(),
                    }])
                } else {
                    Directive::Emit(Vec::new())
                }
            }
            StreamEvent::ToolUse { name, input } => self.on_tool(name, input, session, workdir, kernel),
            StreamEvent::ToolProgress { raw } => {
                trace!(?raw, "tool progress");
                Directive::Emit(Vec::new())
            }
            StreamEvent::Result { usage, duration_ms } => {
                debug!(duration_ms, "result received");
                self.completed = true;
                Directive::Completed(usage)
            }
            StreamEvent::Unknown { raw } => {
                trace!(?raw, "unknown stream event preserved");
                Directive::Emit(Vec::new())
            }
        }
    }

    fn on_tool(
        &mut self,
        name: String,
        input: Value,
        session: &Session,
        workdir: &Path,
        kernel: &SafetyKernel,
    ) -> Directive {
        let label = tool_label(&name, &input);

        if let Err(reason) = screen_tool(&name, &input, workdir, kernel) {
            return Directive::Blocked {
                notice: format!("BLOCKED: {reason}"),
                reason,
            };
        }

        // Every tool boundary closes the open segment and drains steering,
        // the button-question tool included.
        let mut events = Vec::new();
        if let Some(flush) = self.flush_segment() {
            events.push(flush);
        }

        let steered = session.steering.drain();
        let frame = if steered.is_empty() {
            None
        } else {
            let joined = steered
                .iter()
                .map(|m| m.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            Some(format!(
                "[USER SENT MESSAGE DURING EXECUTION]\n{joined}\n[END USER MESSAGE]"
            ))
        };

        if name.starts_with(BUTTON_TOOL_PREFIX) {
            return Directive::ButtonTool {
                label,
                frame,
                before: events,
            };
        }

        events.push(StatusEvent::Tool { label: label.clone() });
        match frame {
            Some(frame) => Directive::Inject {
                frame,
                label,
                then: events,
            },
            None => Directive::ToolStatus { label, events },
        }
    }

    /// Close the current segment, if any text accumulated.
    fn flush_segment(&mut self) -> Option<StatusEvent> {
        if self.current.is_empty() {
            return None;
        }
        let content = std::mem::take(&mut self.current);
        let ev = StatusEvent::SegmentEnd {
            segment: self.segment,
            content: content.clone(),
        };
        self.segments.push(content);
        self.segment += 1;
        self.last_text_emit = None;
        Some(ev)
    }

    /// Terminal flush: final segment end (if any) followed by `Done`.
    fn finalize(&mut self) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        if let Some(flush) = self.flush_segment() {
            events.push(flush);
        }
        if !self.done_emitted {
            self.done_emitted = true;
            events.push(StatusEvent::Done);
        }
        events
    }

    fn full_text(&self) -> String {
        self.segments.join("\n\n")
    }
}

/// Per-event policy screening against the decoded tool input.
fn screen_tool(
    name: &str,
    input: &Value,
    workdir: &Path,
    kernel: &SafetyKernel,
) -> Result<(), String> {
    match name {
        "Bash" => {
            let command = input.get("command").and_then(Value::as_str).unwrap_or("");
            match kernel.commands.check_command(command, workdir) {
                CommandVerdict::Allow => Ok(()),
                CommandVerdict::Deny(reason) => Err(reason),
            }
        }
        "Read" => screen_path(input, |p| kernel.paths.is_read_allowed(p)),
        "Write" | "Edit" => screen_path(input, |p| kernel.paths.is_path_allowed(p)),
        _ => Ok(()),
    }
}

fn screen_path(input: &Value, allowed: impl Fn(&str) -> bool) -> Result<(), String> {
    match input.get("file_path").and_then(Value::as_str) {
        Some(path) if allowed(path) => Ok(()),
        Some(path) => Err(format!("path '{path}' is outside the allowed directories")),
        None => Ok(()),
    }
}

/// Short human-readable status line for a tool invocation.
fn tool_label(name: &str, input: &Value) -> String {
    let detail = match name {
        "Bash" => input.get("command").and_then(Value::as_str),
        "Read" | "Write" | "Edit" => input.get("file_path").and_then(Value::as_str),
        "Grep" | "Glob" => input.get("pattern").and_then(Value::as_str),
        _ => None,
    };
    match detail {
        Some(d) => {
            let mut d = d.to_string();
            if d.chars().count() > 120 {
                d = d.chars().take(120).collect::<String>() + "…";
            }
            format!("{name}: {d}")
        }
        None => name.to_string(),
    }
}

/// Pick the reasoning budget for one prompt by keyword match.
pub fn thinking_budget_for(cfg: &ThinkingConfig, prompt: &str) -> u32 {
    let lower = prompt.to_lowercase();
    if cfg
        .deep_keywords
        .iter()
        .any(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
    {
        50_000
    } else if cfg
        .keywords
        .iter()
        .any(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
    {
        10_000
    } else {
        cfg.default_budget
    }
}

/// The first query of a fresh session is prefixed with a localized stamp so
/// the agent knows what "today" means.
fn dated_prompt(prompt: &str) -> String {
    let now = chrono::Local::now();
    format!(
        "Current date and time: {}\n\n{prompt}",
        now.format("%Y-%m-%d %H:%M %Z (%A)")
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use gofer_config::Config;

    fn kernel_in(dir: &Path) -> SafetyKernel {
        let mut config = Config::for_tests(dir.to_path_buf());
        config.temp_dir = std::path::PathBuf::from("/tmp/gofer");
        SafetyKernel::from_config(&config)
    }

    fn text(delta: &str) -> StreamEvent {
        StreamEvent::AssistantText {
            delta: delta.into(),
        }
    }

    fn bash(command: &str) -> StreamEvent {
        StreamEvent::ToolUse {
            name: "Bash".into(),
            input: json!({"command": command}),
        }
    }

    fn button_tool() -> StreamEvent {
        StreamEvent::ToolUse {
            name: format!("{BUTTON_TOOL_PREFIX}__choose"),
            input: json!({}),
        }
    }

    fn drive(turn: &mut QueryTurn, session: &Session, dir: &Path, events: Vec<StreamEvent>) -> Vec<StatusEvent> {
        let kernel = kernel_in(dir);
        let mut out = Vec::new();
        for ev in events {
            match turn.on_event(ev, session, dir, &kernel) {
                Directive::Emit(batch) => out.extend(batch),
                Directive::ToolStatus { events, .. } => out.extend(events),
                Directive::Inject { then, .. } => out.extend(then),
                Directive::Blocked { notice, .. } => {
                    out.push(StatusEvent::Tool { label: notice })
                }
                Directive::ButtonTool { label, before, .. } => {
                    out.extend(before);
                    out.push(StatusEvent::Tool { label });
                }
                Directive::SessionMinted(_) | Directive::Completed(_) => {}
            }
        }
        out
    }

    // ── Segmentation ──────────────────────────────────────────────────────────

    #[test]
    fn text_for_segment_precedes_its_end_which_precedes_next_segment() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(dir.path().to_path_buf());
        let mut turn = QueryTurn::new();

        let long = "x".repeat(40);
        let mut events = drive(
            &mut turn,
            &session,
            dir.path(),
            vec![
                text(&long),
                bash("cargo test"),
                text(&long),
                button_tool(),
                text(&long),
            ],
        );
        events.extend(turn.finalize());

        // Projected to (segment, kind): text(k) strictly precedes
        // segment_end(k), which precedes any event for segment k+1. Both the
        // shell tool and the button tool count as boundaries.
        let mut closed: u32 = 0;
        let mut tools = 0;
        for ev in &events {
            match ev {
                StatusEvent::Text { segment, .. } => {
                    assert_eq!(*segment, closed, "text for an already-closed segment");
                }
                StatusEvent::SegmentEnd { segment, .. } => {
                    assert_eq!(*segment, closed, "segments close out of order");
                    closed += 1;
                }
                StatusEvent::Tool { .. } => {
                    assert_eq!(tools + 1, closed, "tool status before its segment closed");
                    tools += 1;
                }
                _ => {}
            }
        }
        assert_eq!(closed, 3, "two tool boundaries plus the tail");
        assert_eq!(tools, 2);
        assert!(matches!(events.last(), Some(StatusEvent::Done)));
    }

    #[test]
    fn every_segment_end_is_followed_by_tool_or_done() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(dir.path().to_path_buf());
        let mut turn = QueryTurn::new();

        let long = "y".repeat(30);
        let mut events = drive(
            &mut turn,
            &session,
            dir.path(),
            vec![
                text(&long),
                bash("ls"),
                text(&long),
                button_tool(),
                text(&long),
            ],
        );
        events.extend(turn.finalize());

        for (i, ev) in events.iter().enumerate() {
            if matches!(ev, StatusEvent::SegmentEnd { .. }) {
                let next = events.get(i + 1);
                assert!(
                    matches!(next, Some(StatusEvent::Tool { .. }) | Some(StatusEvent::Done)),
                    "segment end at {i} followed by {next:?}"
                );
            }
        }
    }

    #[test]
    fn short_text_is_not_emitted_until_floor_reached() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(dir.path().to_path_buf());
        let mut turn = QueryTurn::new();

        let events = drive(&mut turn, &session, dir.path(), vec![text("short")]);
        assert!(events.is_empty());
        // The text still lands in the final segment.
        let final_events = turn.finalize();
        assert!(matches!(
            &final_events[0],
            StatusEvent::SegmentEnd { segment: 0, content } if content == "short"
        ));
    }

    #[test]
    fn no_events_after_done() {
        let mut turn = QueryTurn::new();
        turn.current = "tail".into();
        let first = turn.finalize();
        assert!(matches!(first.last(), Some(StatusEvent::Done)));
        assert!(turn.finalize().is_empty());
    }

    #[test]
    fn full_text_concatenates_segments() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(dir.path().to_path_buf());
        let mut turn = QueryTurn::new();
        let a = "a".repeat(25);
        drive(
            &mut turn,
            &session,
            dir.path(),
            vec![text(&a), bash("ls"), text("done.")],
        );
        turn.finalize();
        assert_eq!(turn.full_text(), format!("{a}\n\ndone."));
    }

    // ── Policy ────────────────────────────────────────────────────────────────

    #[test]
    fn blocked_command_produces_blocked_directive() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(dir.path().to_path_buf());
        let kernel = kernel_in(dir.path());
        let mut turn = QueryTurn::new();

        let d = turn.on_event(
            bash("bash -c 'rm -rf /tmp/../..'"),
            &session,
            dir.path(),
            &kernel,
        );
        match d {
            Directive::Blocked { notice, .. } => assert!(notice.starts_with("BLOCKED:")),
            _ => panic!("expected blocked directive"),
        }
    }

    #[test]
    fn write_outside_allowed_paths_is_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(dir.path().to_path_buf());
        let kernel = kernel_in(dir.path());
        let mut turn = QueryTurn::new();

        let d = turn.on_event(
            StreamEvent::ToolUse {
                name: "Write".into(),
                input: json!({"file_path": "/etc/cron.d/evil"}),
            },
            &session,
            dir.path(),
            &kernel,
        );
        assert!(matches!(d, Directive::Blocked { .. }));
    }

    #[test]
    fn read_from_temp_media_dir_is_exempt() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(dir.path().to_path_buf());
        let kernel = kernel_in(dir.path());
        let mut turn = QueryTurn::new();

        let d = turn.on_event(
            StreamEvent::ToolUse {
                name: "Read".into(),
                input: json!({"file_path": "/tmp/gofer/voice_1.ogg"}),
            },
            &session,
            dir.path(),
            &kernel,
        );
        assert!(matches!(d, Directive::ToolStatus { .. }));
    }

    // ── Steering ──────────────────────────────────────────────────────────────

    #[test]
    fn steering_buffer_drains_into_injected_frame_at_tool_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(dir.path().to_path_buf());
        let kernel = kernel_in(dir.path());
        session.steering.push("also check tests".into());

        let mut turn = QueryTurn::new();
        let d = turn.on_event(bash("cargo build"), &session, dir.path(), &kernel);
        match d {
            Directive::Inject { frame, .. } => {
                assert!(frame.contains("[USER SENT MESSAGE DURING EXECUTION]"));
                assert!(frame.contains("also check tests"));
                assert!(frame.contains("[END USER MESSAGE]"));
            }
            _ => panic!("expected steering injection"),
        }
        assert!(session.steering.is_empty());
    }

    #[test]
    fn no_injection_without_steered_messages() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(dir.path().to_path_buf());
        let kernel = kernel_in(dir.path());
        let mut turn = QueryTurn::new();
        let d = turn.on_event(bash("cargo build"), &session, dir.path(), &kernel);
        assert!(matches!(d, Directive::ToolStatus { .. }));
    }

    // ── Button tool boundary ──────────────────────────────────────────────────

    #[test]
    fn button_tool_closes_the_open_segment_before_its_status() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(dir.path().to_path_buf());
        let kernel = kernel_in(dir.path());
        let mut turn = QueryTurn::new();

        turn.on_event(text("answer so far"), &session, dir.path(), &kernel);
        let d = turn.on_event(button_tool(), &session, dir.path(), &kernel);
        match d {
            Directive::ButtonTool { frame, before, .. } => {
                assert!(frame.is_none());
                assert!(matches!(
                    before.as_slice(),
                    [StatusEvent::SegmentEnd { segment: 0, content }]
                        if content.as_str() == "answer so far"
                ));
            }
            _ => panic!("expected a button-tool directive"),
        }
        // The boundary advanced the segment even if no request file shows up.
        assert_eq!(turn.segment, 1);
    }

    #[test]
    fn button_tool_with_no_open_segment_flushes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(dir.path().to_path_buf());
        let kernel = kernel_in(dir.path());
        let mut turn = QueryTurn::new();

        let d = turn.on_event(button_tool(), &session, dir.path(), &kernel);
        match d {
            Directive::ButtonTool { before, .. } => assert!(before.is_empty()),
            _ => panic!("expected a button-tool directive"),
        }
        assert_eq!(turn.segment, 0);
    }

    #[test]
    fn steering_drains_before_a_button_tool() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(dir.path().to_path_buf());
        let kernel = kernel_in(dir.path());
        session.steering.push("pick staging".into());

        let mut turn = QueryTurn::new();
        let d = turn.on_event(button_tool(), &session, dir.path(), &kernel);
        match d {
            Directive::ButtonTool {
                frame: Some(frame), ..
            } => {
                assert!(frame.contains("[USER SENT MESSAGE DURING EXECUTION]"));
                assert!(frame.contains("pick staging"));
                assert!(frame.contains("[END USER MESSAGE]"));
            }
            _ => panic!("expected a steering frame on the button-tool boundary"),
        }
        assert!(session.steering.is_empty());
    }

    // ── Thinking budget ───────────────────────────────────────────────────────

    #[test]
    fn deep_keyword_wins_over_normal() {
        let cfg = ThinkingConfig::default();
        assert_eq!(thinking_budget_for(&cfg, "think hard about this"), 50_000);
        assert_eq!(thinking_budget_for(&cfg, "please think about it"), 10_000);
        assert_eq!(thinking_budget_for(&cfg, "just do it"), 0);
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        let cfg = ThinkingConfig::default();
        assert_eq!(thinking_budget_for(&cfg, "THINK HARD"), 50_000);
    }

    // ── Labels ────────────────────────────────────────────────────────────────

    #[test]
    fn tool_label_shows_command_for_bash() {
        let l = tool_label("Bash", &json!({"command": "cargo check"}));
        assert_eq!(l, "Bash: cargo check");
    }

    #[test]
    fn tool_label_truncates_long_commands() {
        let long = "x".repeat(500);
        let l = tool_label("Bash", &json!({"command": long}));
        assert!(l.chars().count() < 140);
        assert!(l.ends_with('…'));
    }

    #[test]
    fn tool_label_falls_back_to_name() {
        assert_eq!(tool_label("WebSearch", &json!({})), "WebSearch");
    }

    #[test]
    fn dated_prompt_keeps_original_text() {
        let p = dated_prompt("hello");
        assert!(p.contains("hello"));
        assert!(p.starts_with("Current date and time:"));
    }
}

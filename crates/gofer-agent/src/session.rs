// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::events::Usage;

/// Context-window budget the alarms are computed against.
pub const CONTEXT_TOKEN_LIMIT: u64 = 200_000;
/// Crossing this makes the next text query trigger an automatic save.
pub const SAVE_THRESHOLD_TOKENS: u64 = 180_000;
/// Completed queries after a restore during which alarms stay silent.
pub const RESTORE_COOLDOWN_MESSAGES: u32 = 50;
/// Steering messages held at most; later ones are refused.
const STEERING_CAPACITY: usize = 16;

/// Cumulative token counters for one session. Monotone nondecreasing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read: u64,
    pub cache_create: u64,
    pub queries: u64,
}

impl UsageTotals {
    /// Tokens counted against the context budget.
    pub fn context_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One-shot warning flags; each threshold fires at most once per session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFlags {
    pub warned_70: bool,
    pub warned_85: bool,
    pub warned_95: bool,
    pub save_required: bool,
}

/// Alarm raised when a context threshold is first crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextAlarm {
    Warn70,
    Warn85,
    Warn95,
    SaveRequired,
}

/// Mutable per-chat session record. Mutated only by the running query's
/// task; other tasks take snapshot reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Minted by the agent on its first event; set at most once per run.
    pub session_id: Option<String>,
    pub working_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub totals: UsageTotals,
    /// The last user prompt, kept for `/retry`.
    pub last_message: Option<String>,
    pub flags: ContextFlags,
    /// True right after a saved context was loaded; suppresses alarms.
    pub recently_restored: bool,
    pub messages_since_restore: u32,
    /// Alarms crossed by completed queries, not yet shown to the user.
    #[serde(skip)]
    pub pending_alarms: Vec<ContextAlarm>,
}

impl SessionState {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            session_id: None,
            working_dir,
            started_at: Utc::now(),
            totals: UsageTotals::default(),
            last_message: None,
            flags: ContextFlags::default(),
            recently_restored: false,
            messages_since_restore: 0,
            pending_alarms: Vec::new(),
        }
    }

    /// Record the minted session id. A second id within the same run is
    /// ignored; the first one wins.
    pub fn set_session_id(&mut self, id: &str) -> bool {
        if self.session_id.is_some() {
            return false;
        }
        self.session_id = Some(id.to_string());
        true
    }

    /// Accumulate a completed query's usage and report alarms whose
    /// thresholds were crossed for the first time.
    pub fn record_usage(&mut self, usage: &Usage) -> Vec<ContextAlarm> {
        self.totals.input_tokens += usage.input_tokens;
        self.totals.output_tokens += usage.output_tokens;
        self.totals.cache_read += usage.cache_read_input_tokens;
        self.totals.cache_create += usage.cache_creation_input_tokens;
        self.totals.queries += 1;

        if self.recently_restored {
            self.messages_since_restore += 1;
            if self.messages_since_restore >= RESTORE_COOLDOWN_MESSAGES {
                self.recently_restored = false;
                self.messages_since_restore = 0;
            }
            return Vec::new();
        }

        let used = self.totals.context_tokens();
        let mut alarms = Vec::new();
        if !self.flags.warned_70 && used * 100 >= CONTEXT_TOKEN_LIMIT * 70 {
            self.flags.warned_70 = true;
            alarms.push(ContextAlarm::Warn70);
        }
        if !self.flags.warned_85 && used * 100 >= CONTEXT_TOKEN_LIMIT * 85 {
            self.flags.warned_85 = true;
            alarms.push(ContextAlarm::Warn85);
        }
        if !self.flags.warned_95 && used * 100 >= CONTEXT_TOKEN_LIMIT * 95 {
            self.flags.warned_95 = true;
            alarms.push(ContextAlarm::Warn95);
        }
        if !self.flags.save_required && used >= SAVE_THRESHOLD_TOKENS {
            self.flags.save_required = true;
            alarms.push(ContextAlarm::SaveRequired);
        }
        self.pending_alarms.extend(alarms.iter().copied());
        alarms
    }

    pub fn context_fraction(&self) -> f64 {
        self.totals.context_tokens() as f64 / CONTEXT_TOKEN_LIMIT as f64
    }

    /// Clear everything for `/new`: id, counters, flags, cooldown.
    pub fn reset(&mut self) {
        let wd = self.working_dir.clone();
        *self = SessionState::new(wd);
    }

    /// Enter the post-restore cooldown: alarms silent, flags cleared.
    pub fn mark_restored(&mut self) {
        self.recently_restored = true;
        self.messages_since_restore = 0;
        self.flags = ContextFlags::default();
    }
}

/// A message the user sent while a query was running.
#[derive(Debug, Clone)]
pub struct SteeredMessage {
    pub text: String,
    pub arrived_at: DateTime<Utc>,
}

/// Bounded FIFO drained at the next tool-invocation boundary.
#[derive(Debug, Default)]
pub struct SteeringBuffer {
    inner: Mutex<VecDeque<SteeredMessage>>,
}

impl SteeringBuffer {
    /// Returns false when the buffer is full and the message was refused.
    pub fn push(&self, text: String) -> bool {
        let mut q = self.inner.lock().expect("steering buffer poisoned");
        if q.len() >= STEERING_CAPACITY {
            return false;
        }
        q.push_back(SteeredMessage {
            text,
            arrived_at: Utc::now(),
        });
        true
    }

    pub fn drain(&self) -> Vec<SteeredMessage> {
        let mut q = self.inner.lock().expect("steering buffer poisoned");
        q.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().expect("steering buffer poisoned").is_empty()
    }
}

/// Result of [`Session::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// A running query was aborted.
    Stopped,
    /// The query had not spawned yet; it will fail before spawning.
    Pending,
    /// Nothing was running.
    Noop,
}

/// Cancellation handle for the query in flight.
#[derive(Debug)]
pub struct QueryControl {
    stop_requested: AtomicBool,
    cancel: CancellationToken,
}

impl QueryControl {
    fn new() -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// One chat's agent session: state, steering, and the in-flight query.
#[derive(Debug)]
pub struct Session {
    pub state: Mutex<SessionState>,
    pub steering: SteeringBuffer,
    control: Mutex<Option<Arc<QueryControl>>>,
    /// Set between accepting a message and finishing its query.
    processing: AtomicBool,
    /// Whether the agent child has actually spawned.
    running: AtomicBool,
    /// One-shot: the next Cancelled outcome stays silent.
    interrupted: AtomicBool,
}

impl Session {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            state: Mutex::new(SessionState::new(working_dir)),
            steering: SteeringBuffer::default(),
            control: Mutex::new(None),
            processing: AtomicBool::new(false),
            running: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
        }
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.lock().expect("session state poisoned").clone()
    }

    /// Register a new query. Returns its cancellation handle.
    pub fn begin_query(&self) -> Arc<QueryControl> {
        let control = Arc::new(QueryControl::new());
        *self.control.lock().expect("control poisoned") = Some(Arc::clone(&control));
        self.processing.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        control
    }

    /// The decode loop is live; phase B cancellation applies from here on.
    pub fn mark_running(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn end_query(&self) {
        *self.control.lock().expect("control poisoned") = None;
        self.processing.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    /// Idempotent stop. Phase A (pre-spawn): flag the control so the runner
    /// fails before spawning. Phase B (running): cancel the token, which
    /// closes the agent's stdin and unblocks the decode loop.
    pub fn stop(&self) -> StopOutcome {
        let guard = self.control.lock().expect("control poisoned");
        match guard.as_ref() {
            None => StopOutcome::Noop,
            Some(control) => {
                if self.running.load(Ordering::SeqCst) {
                    control.cancel.cancel();
                    debug!("running query aborted");
                    StopOutcome::Stopped
                } else {
                    control.stop_requested.store(true, Ordering::SeqCst);
                    debug!("stop requested before spawn");
                    StopOutcome::Pending
                }
            }
        }
    }

    /// Flag that the next cancellation came from a user interrupt, so the
    /// "Query stopped" notice is suppressed.
    pub fn set_interrupted(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    /// Read and clear the interrupt flag.
    pub fn take_interrupted(&self) -> bool {
        self.interrupted.swap(false, Ordering::SeqCst)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(input: u64, output: u64) -> Usage {
        Usage {
            input_tokens: input,
            output_tokens: output,
            ..Default::default()
        }
    }

    // ── Session id ────────────────────────────────────────────────────────────

    #[test]
    fn session_id_is_set_at_most_once() {
        let mut s = SessionState::new("/tmp".into());
        assert!(s.set_session_id("first"));
        assert!(!s.set_session_id("second"));
        assert_eq!(s.session_id.as_deref(), Some("first"));
    }

    // ── Usage accumulation ────────────────────────────────────────────────────

    #[test]
    fn counters_are_monotone_across_queries() {
        let mut s = SessionState::new("/tmp".into());
        s.record_usage(&usage(100, 50));
        s.record_usage(&usage(10, 5));
        assert_eq!(s.totals.input_tokens, 110);
        assert_eq!(s.totals.output_tokens, 55);
        assert_eq!(s.totals.queries, 2);
    }

    #[test]
    fn no_alarm_below_seventy_percent() {
        let mut s = SessionState::new("/tmp".into());
        let alarms = s.record_usage(&usage(100_000, 30_000)); // 65%
        assert!(alarms.is_empty());
        assert!(!s.flags.warned_70);
    }

    #[test]
    fn alarm_fires_once_at_each_threshold() {
        let mut s = SessionState::new("/tmp".into());
        let a = s.record_usage(&usage(140_000, 0)); // 70%
        assert_eq!(a, vec![ContextAlarm::Warn70]);
        let a = s.record_usage(&usage(1_000, 0)); // still past 70, no repeat
        assert!(a.is_empty());
        let a = s.record_usage(&usage(30_000, 0)); // 85.5%
        assert_eq!(a, vec![ContextAlarm::Warn85]);
    }

    #[test]
    fn save_required_at_ninety_percent() {
        let mut s = SessionState::new("/tmp".into());
        let a = s.record_usage(&usage(180_000, 0));
        assert!(a.contains(&ContextAlarm::SaveRequired));
        assert!(a.contains(&ContextAlarm::Warn85));
        assert!(s.flags.save_required);
    }

    #[test]
    fn one_huge_query_fires_all_thresholds_in_order() {
        let mut s = SessionState::new("/tmp".into());
        let a = s.record_usage(&usage(200_000, 0));
        assert_eq!(
            a,
            vec![
                ContextAlarm::Warn70,
                ContextAlarm::Warn85,
                ContextAlarm::Warn95,
                ContextAlarm::SaveRequired
            ]
        );
    }

    // ── Restore cooldown ──────────────────────────────────────────────────────

    #[test]
    fn restored_session_suppresses_alarms() {
        let mut s = SessionState::new("/tmp".into());
        s.mark_restored();
        let a = s.record_usage(&usage(200_000, 0));
        assert!(a.is_empty());
        assert!(!s.flags.warned_70);
    }

    #[test]
    fn mark_restored_clears_existing_flags() {
        let mut s = SessionState::new("/tmp".into());
        s.record_usage(&usage(200_000, 0));
        assert!(s.flags.save_required);
        s.mark_restored();
        assert_eq!(s.flags, ContextFlags::default());
        assert!(s.recently_restored);
    }

    #[test]
    fn cooldown_expires_after_enough_messages() {
        let mut s = SessionState::new("/tmp".into());
        s.mark_restored();
        for _ in 0..RESTORE_COOLDOWN_MESSAGES {
            s.record_usage(&usage(1, 0));
        }
        assert!(!s.recently_restored);
        assert_eq!(s.messages_since_restore, 0);
    }

    #[test]
    fn reset_clears_everything_but_working_dir() {
        let mut s = SessionState::new("/srv/work".into());
        s.set_session_id("id");
        s.record_usage(&usage(200_000, 0));
        s.reset();
        assert!(s.session_id.is_none());
        assert_eq!(s.totals, UsageTotals::default());
        assert_eq!(s.flags, ContextFlags::default());
        assert_eq!(s.working_dir, PathBuf::from("/srv/work"));
    }

    // ── Steering buffer ───────────────────────────────────────────────────────

    #[test]
    fn steering_preserves_fifo_order() {
        let b = SteeringBuffer::default();
        assert!(b.push("one".into()));
        assert!(b.push("two".into()));
        let drained = b.drain();
        assert_eq!(drained[0].text, "one");
        assert_eq!(drained[1].text, "two");
        assert!(b.is_empty());
    }

    #[test]
    fn steering_refuses_past_capacity() {
        let b = SteeringBuffer::default();
        for i in 0..STEERING_CAPACITY {
            assert!(b.push(format!("m{i}")));
        }
        assert!(!b.push("overflow".into()));
        assert_eq!(b.drain().len(), STEERING_CAPACITY);
    }

    // ── Stop semantics ────────────────────────────────────────────────────────

    #[test]
    fn stop_without_query_is_noop() {
        let s = Session::new("/tmp".into());
        assert_eq!(s.stop(), StopOutcome::Noop);
    }

    #[test]
    fn stop_before_spawn_flags_the_control() {
        let s = Session::new("/tmp".into());
        let control = s.begin_query();
        assert_eq!(s.stop(), StopOutcome::Pending);
        assert!(control.stop_requested());
        assert!(!control.cancel_token().is_cancelled());
    }

    #[test]
    fn stop_while_running_cancels_the_token() {
        let s = Session::new("/tmp".into());
        let control = s.begin_query();
        s.mark_running();
        assert_eq!(s.stop(), StopOutcome::Stopped);
        assert!(control.cancel_token().is_cancelled());
    }

    #[test]
    fn stop_is_idempotent() {
        let s = Session::new("/tmp".into());
        let _control = s.begin_query();
        s.mark_running();
        assert_eq!(s.stop(), StopOutcome::Stopped);
        assert_eq!(s.stop(), StopOutcome::Stopped);
        s.end_query();
        assert_eq!(s.stop(), StopOutcome::Noop);
    }

    #[test]
    fn interrupt_flag_is_one_shot() {
        let s = Session::new("/tmp".into());
        s.set_interrupted();
        assert!(s.take_interrupted());
        assert!(!s.take_interrupted());
    }
}

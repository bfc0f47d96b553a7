// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

/// Fire-times waiting behind a busy session, bounded; oldest drops first.
pub const MAX_PENDING_JOBS: usize = 5;
/// Executions allowed in any sliding one-hour window.
pub const MAX_JOBS_PER_HOUR: usize = 12;

/// One cron firing that is due (or was deferred).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRun {
    pub job_name: String,
    pub prompt: String,
    pub notify: bool,
    pub due_at: DateTime<Utc>,
}

/// Shared between the scheduler tick and the session lifecycle: deferred
/// runs, the sliding execution window, and the re-entrancy lock.
#[derive(Debug, Default)]
pub struct CronQueue {
    pending: Mutex<VecDeque<PendingRun>>,
    executions: Mutex<VecDeque<DateTime<Utc>>>,
    execution_lock: AtomicBool,
}

impl CronQueue {
    /// Defer a run. At capacity the *oldest* entry is dropped.
    pub fn defer(&self, run: PendingRun) {
        let mut pending = self.pending.lock().expect("cron queue poisoned");
        if pending.len() >= MAX_PENDING_JOBS {
            if let Some(dropped) = pending.pop_front() {
                warn!(job = %dropped.job_name, "pending cron queue full, dropping oldest");
            }
        }
        pending.push_back(run);
    }

    /// Take the next deferred run, if any.
    pub fn pop_deferred(&self) -> Option<PendingRun> {
        self.pending.lock().expect("cron queue poisoned").pop_front()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("cron queue poisoned").len()
    }

    /// Acquire the execution lock; false when a cron run is already active.
    pub fn try_lock_execution(&self) -> bool {
        self.execution_lock
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn unlock_execution(&self) {
        self.execution_lock.store(false, Ordering::SeqCst);
    }

    pub fn execution_locked(&self) -> bool {
        self.execution_lock.load(Ordering::SeqCst)
    }

    /// True when another execution fits under the hourly cap at `now`.
    pub fn under_hourly_cap(&self, now: DateTime<Utc>) -> bool {
        let mut executions = self.executions.lock().expect("cron queue poisoned");
        let cutoff = now - Duration::hours(1);
        while executions.front().is_some_and(|t| *t < cutoff) {
            executions.pop_front();
        }
        executions.len() < MAX_JOBS_PER_HOUR
    }

    pub fn record_execution(&self, at: DateTime<Utc>) {
        self.executions.lock().expect("cron queue poisoned").push_back(at);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn run(name: &str) -> PendingRun {
        PendingRun {
            job_name: name.into(),
            prompt: "p".into(),
            notify: false,
            due_at: Utc::now(),
        }
    }

    // ── Pending queue bound ───────────────────────────────────────────────────

    #[test]
    fn defer_and_pop_are_fifo() {
        let q = CronQueue::default();
        q.defer(run("a"));
        q.defer(run("b"));
        assert_eq!(q.pop_deferred().unwrap().job_name, "a");
        assert_eq!(q.pop_deferred().unwrap().job_name, "b");
        assert!(q.pop_deferred().is_none());
    }

    #[test]
    fn queue_full_drops_the_oldest() {
        let q = CronQueue::default();
        for i in 0..MAX_PENDING_JOBS + 2 {
            q.defer(run(&format!("job{i}")));
        }
        assert_eq!(q.pending_count(), MAX_PENDING_JOBS);
        // job0 and job1 were dropped.
        assert_eq!(q.pop_deferred().unwrap().job_name, "job2");
    }

    // ── Execution lock ────────────────────────────────────────────────────────

    #[test]
    fn execution_lock_is_not_reentrant() {
        let q = CronQueue::default();
        assert!(q.try_lock_execution());
        assert!(!q.try_lock_execution());
        q.unlock_execution();
        assert!(q.try_lock_execution());
    }

    // ── Hourly cap ────────────────────────────────────────────────────────────

    #[test]
    fn hourly_cap_blocks_after_limit() {
        let q = CronQueue::default();
        let now = Utc::now();
        for i in 0..MAX_JOBS_PER_HOUR {
            assert!(q.under_hourly_cap(now), "execution {i} should fit");
            q.record_execution(now);
        }
        assert!(!q.under_hourly_cap(now));
    }

    #[test]
    fn hourly_window_slides() {
        let q = CronQueue::default();
        let now = Utc::now();
        let old = now - Duration::minutes(70);
        for _ in 0..MAX_JOBS_PER_HOUR {
            q.record_execution(old);
        }
        // Everything in the window is stale, so new executions fit again.
        assert!(q.under_hourly_cap(now));
    }
}

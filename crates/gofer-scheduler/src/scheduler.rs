// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::manifest::{CronJob, CronManifest, ManifestWatcher};
use crate::queue::{CronQueue, PendingRun};

/// How often fire-times are evaluated. Minute-level schedules make anything
/// finer pointless.
const TICK: Duration = Duration::from_secs(30);

/// Evaluates the manifest on a timer and hands due runs to the bot, queueing
/// them while a session is busy.
pub struct Scheduler {
    watcher: Mutex<ManifestWatcher>,
    queue: Arc<CronQueue>,
}

impl Scheduler {
    pub fn new(manifest_path: impl AsRef<Path>) -> Self {
        Self {
            watcher: Mutex::new(ManifestWatcher::new(manifest_path.as_ref())),
            queue: Arc::new(CronQueue::default()),
        }
    }

    pub fn queue(&self) -> Arc<CronQueue> {
        Arc::clone(&self.queue)
    }

    /// `/cron reload`: force a reload, returning the job count.
    pub fn reload(&self) -> usize {
        self.watcher.lock().expect("watcher poisoned").reload()
    }

    pub fn jobs(&self) -> Vec<CronJob> {
        self.watcher
            .lock()
            .expect("watcher poisoned")
            .manifest()
            .jobs
            .clone()
    }

    /// Tick forever. `busy` reports whether a query is in flight; due runs
    /// are deferred while it returns true and drained on completion via
    /// [`CronQueue::pop_deferred`].
    pub async fn run(
        self: Arc<Self>,
        busy: Arc<dyn Fn() -> bool + Send + Sync>,
        tx: mpsc::Sender<PendingRun>,
    ) {
        let mut last_tick = Utc::now();
        loop {
            tokio::time::sleep(TICK).await;
            let now = Utc::now();

            let manifest = {
                let mut watcher = self.watcher.lock().expect("watcher poisoned");
                if watcher.reload_if_changed() {
                    info!(jobs = watcher.manifest().jobs.len(), "cron manifest reloaded");
                }
                watcher.manifest().clone()
            };

            for run in due_runs(&manifest, last_tick, now) {
                if !self.queue.under_hourly_cap(now) {
                    warn!(job = %run.job_name, "hourly cron cap reached, skipping");
                    continue;
                }
                if busy() || self.queue.execution_locked() {
                    debug!(job = %run.job_name, "session busy, deferring cron run");
                    self.queue.defer(run);
                } else if tx.send(run).await.is_err() {
                    return; // receiver gone, bot shut down
                }
            }
            last_tick = now;
        }
    }
}

/// Fire-times of enabled jobs falling in `(from, to]`.
pub fn due_runs(
    manifest: &CronManifest,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Vec<PendingRun> {
    let mut due = Vec::new();
    for job in manifest.jobs.iter().filter(|j| j.enabled) {
        let Ok(schedule) = job.parsed_schedule() else {
            continue; // validated at load time; defensive here
        };
        for fire in schedule.after(&from) {
            if fire > to {
                break;
            }
            due.push(PendingRun {
                job_name: job.name.clone(),
                prompt: job.prompt.clone(),
                notify: job.notify,
                due_at: fire,
            });
        }
    }
    due
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

fn default_true() -> bool {
    true
}

/// One scheduled prompt from `cron.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub name: String,
    /// Standard 5-field cron expression (minute granularity).
    pub schedule: String,
    pub prompt: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Send the agent's answer to the chat instead of running silently.
    #[serde(default)]
    pub notify: bool,
}

impl CronJob {
    pub fn parsed_schedule(&self) -> anyhow::Result<cron::Schedule> {
        cron::Schedule::from_str(&normalize_cron_expr(&self.schedule))
            .with_context(|| format!("job '{}': invalid schedule '{}'", self.name, self.schedule))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronManifest {
    #[serde(default)]
    pub jobs: Vec<CronJob>,
}

/// The `cron` crate wants a seconds field; user manifests use classic
/// 5-field expressions. Prepend `0` when needed.
pub fn normalize_cron_expr(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

pub fn load_manifest(path: &Path) -> anyhow::Result<CronManifest> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let manifest: CronManifest =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    for job in &manifest.jobs {
        // Surface bad expressions at load time, not at fire time.
        job.parsed_schedule()?;
    }
    Ok(manifest)
}

/// Keeps the manifest in sync with the file on disk, reloading when the
/// mtime changes or on demand.
#[derive(Debug)]
pub struct ManifestWatcher {
    path: PathBuf,
    mtime: Option<SystemTime>,
    manifest: CronManifest,
}

impl ManifestWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let mut watcher = Self {
            path: path.into(),
            mtime: None,
            manifest: CronManifest::default(),
        };
        watcher.reload();
        watcher
    }

    pub fn manifest(&self) -> &CronManifest {
        &self.manifest
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unconditional reload (`/cron reload`). Returns the job count, or the
    /// load error.
    pub fn reload(&mut self) -> usize {
        self.mtime = std::fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        match load_manifest(&self.path) {
            Ok(manifest) => {
                debug!(jobs = manifest.jobs.len(), "cron manifest loaded");
                self.manifest = manifest;
            }
            Err(e) => {
                if self.path.exists() {
                    warn!(error = %e, "cron manifest unreadable, keeping previous jobs");
                } else {
                    self.manifest = CronManifest::default();
                }
            }
        }
        self.manifest.jobs.len()
    }

    /// Reload only when the file's mtime moved. Returns true on reload.
    pub fn reload_if_changed(&mut self) -> bool {
        let current = std::fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        if current != self.mtime {
            self.reload();
            true
        } else {
            false
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

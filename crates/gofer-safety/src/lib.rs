// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod access;
mod archive;
mod command;
mod paths;

pub use access::{AccessPolicy, RateDecision, RateLimiter};
pub use archive::{safe_extract_archive, sanitize_name, ArchiveError, ArchiveLimits};
pub use command::{CommandPolicy, CommandVerdict};
pub use paths::PathPolicy;

use std::sync::Arc;

use gofer_config::{Config, UserId};

/// Immutable policy snapshot consulted on every inbound request and on every
/// tool invocation the agent streams back.
#[derive(Debug)]
pub struct SafetyKernel {
    pub access: AccessPolicy,
    pub rate: RateLimiter,
    pub paths: Arc<PathPolicy>,
    pub commands: CommandPolicy,
}

impl SafetyKernel {
    pub fn from_config(config: &Config) -> Self {
        let paths = Arc::new(PathPolicy::new(
            config.allowed_paths.clone(),
            vec![config.temp_dir.clone()],
        ));
        Self {
            access: AccessPolicy::new(config.allowed_users.iter().copied()),
            rate: RateLimiter::new(
                config.rate.enabled,
                config.rate.requests,
                std::time::Duration::from_secs(config.rate.window_secs),
            ),
            commands: CommandPolicy::new(config.blocked_patterns.clone(), Arc::clone(&paths)),
            paths,
        }
    }

    pub fn is_authorized(&self, user: UserId) -> bool {
        self.access.is_authorized(user)
    }
}

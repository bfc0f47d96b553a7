// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use gofer_config::UserId;

/// Allowlist membership is the primary authentication.
#[derive(Debug)]
pub struct AccessPolicy {
    allowed: HashSet<UserId>,
}

impl AccessPolicy {
    pub fn new(users: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            allowed: users.into_iter().collect(),
        }
    }

    pub fn is_authorized(&self, user: UserId) -> bool {
        self.allowed.contains(&user)
    }
}

/// Outcome of a rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Ok,
    /// Over budget; retry after this many seconds.
    Retry { after_secs: u64 },
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-user token bucket with continuous refill at `capacity / window`
/// tokens per second. Buckets are created lazily on first use.
#[derive(Debug)]
pub struct RateLimiter {
    enabled: bool,
    capacity: f64,
    window: Duration,
    buckets: Mutex<HashMap<UserId, Bucket>>,
}

impl RateLimiter {
    pub fn new(enabled: bool, capacity: u32, window: Duration) -> Self {
        Self {
            enabled,
            capacity: f64::from(capacity.max(1)),
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Consume one token for `user`, refilling from elapsed wall time first.
    pub fn check(&self, user: UserId) -> RateDecision {
        if !self.enabled {
            return RateDecision::Ok;
        }
        let now = Instant::now();
        let refill_per_sec = self.capacity / self.window.as_secs_f64();

        let mut buckets = self.buckets.lock().expect("rate limiter poisoned");
        let bucket = buckets.entry(user).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateDecision::Ok
        } else {
            let deficit = 1.0 - bucket.tokens;
            RateDecision::Retry {
                after_secs: (deficit / refill_per_sec).ceil() as u64,
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

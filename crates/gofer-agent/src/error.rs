// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Everything that can go wrong between an inbound chat message and the
/// agent's final answer.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("rate limited, retry in {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("policy violation: {reason}")]
    PolicyViolation { reason: String },

    #[error("failed to start the agent: {0}")]
    AgentSpawn(String),

    #[error("agent exited with code {exit_code}")]
    AgentCrash { exit_code: i32 },

    #[error("agent protocol error: {detail}")]
    AgentProtocol { detail: String },

    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("query cancelled")]
    Cancelled,

    #[error("query timed out")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

impl RunError {
    /// An agent crash on a plain text query is retried once by the caller
    /// after clearing the session id; nothing else is.
    pub fn is_retryable_crash(&self) -> bool {
        matches!(self, RunError::AgentCrash { .. })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gofer_config::{ChatId, UserId};

use crate::session::SessionState;

/// A pending multiple-choice question written by the auxiliary tool server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonRequest {
    pub request_id: String,
    pub chat_id: ChatId,
    pub question: String,
    pub options: Vec<String>,
}

/// Hand-off channel with the auxiliary button-question server. The
/// production implementation reads the server's temp files; tests use an
/// in-memory one.
#[async_trait]
pub trait ButtonChannel: Send + Sync {
    /// A pending request addressed to `chat`, if one exists right now.
    async fn poll(&self, chat: ChatId) -> Option<ButtonRequest>;
    /// Mark a request as surfaced to the user so it is not re-sent.
    async fn mark_sent(&self, request_id: &str);
}

/// Checkpoint sink for session state. Called when the session id is first
/// learned and after every usage accumulation.
pub trait SessionStore: Send + Sync {
    fn checkpoint(&self, state: &SessionState);
}

/// No-op store for tests.
pub struct NullSessionStore;

impl SessionStore for NullSessionStore {
    fn checkpoint(&self, _state: &SessionState) {}
}

/// Categories recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    Message,
    Auth,
    ToolUse,
    Error,
    RateLimit,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Message => "message",
            AuditKind::Auth => "auth",
            AuditKind::ToolUse => "tool_use",
            AuditKind::Error => "error",
            AuditKind::RateLimit => "rate_limit",
        }
    }
}

/// One audit record. Failures to persist these are logged, never fatal.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub user_id: UserId,
    pub username: Option<String>,
    pub kind: AuditKind,
    pub input: String,
    pub output: String,
}

impl AuditEvent {
    pub fn now(user_id: UserId, kind: AuditKind, input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            user_id,
            username: None,
            kind,
            input: input.into(),
            output: output.into(),
        }
    }
}

/// Append-only audit sink.
pub trait AuditSink: Send + Sync {
    fn append(&self, event: AuditEvent);
}

/// Discards everything; for tests.
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn append(&self, _event: AuditEvent) {}
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod claude;
mod error;
mod events;
mod ports;
mod runner;
mod session;
mod status;

pub use claude::{AgentProcess, SpawnOptions};
pub use error::RunError;
pub use events::{decode_line, StreamEvent, Usage};
pub use ports::{
    AuditEvent, AuditKind, AuditSink, ButtonChannel, ButtonRequest, NullAuditSink,
    NullSessionStore, SessionStore,
};
pub use runner::{thinking_budget_for, SessionRunner, BUTTON_TOOL_PREFIX, SELECTION_PENDING};
pub use session::{
    ContextAlarm, ContextFlags, QueryControl, Session, SessionState, StopOutcome, SteeredMessage,
    SteeringBuffer, UsageTotals, CONTEXT_TOKEN_LIMIT, RESTORE_COOLDOWN_MESSAGES,
    SAVE_THRESHOLD_TOKENS,
};
pub use status::{emit, StatusEvent, StatusSink};

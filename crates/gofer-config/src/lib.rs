// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod loader;
mod mcp;
mod schema;

pub use loader::{from_env, EnvSource};
pub use mcp::{load_mcp_config, McpConfig, McpServer};
pub use schema::{
    AuditConfig, ChatId, CleanupConfig, Config, ProgressConfig, RateConfig, ThinkingConfig,
    TranscriptionConfig, UserId,
};

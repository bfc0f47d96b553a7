// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// One auxiliary tool server the agent may talk to.
///
/// Untagged: stdio entries are `{command, args?, env?}`, HTTP entries are
/// `{type: "http", url, headers?}` — the required field disambiguates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum McpServer {
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
    Stdio {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
    },
}

/// Typed MCP configuration, loaded once at start-up.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpConfig {
    #[serde(rename = "mcpServers", default)]
    pub servers: HashMap<String, McpServer>,
}

impl McpConfig {
    /// Serialize back into the JSON shape the agent binary expects from its
    /// `--mcp-config` flag.
    pub fn to_agent_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("mcp config serializes")
    }
}

/// Load and interpolate the MCP config file. `${VAR}` and `$VAR` references
/// are replaced with the variable's value, or the empty string when unset.
pub fn load_mcp_config(path: &Path) -> anyhow::Result<McpConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let interpolated = interpolate(&text, &|var| std::env::var(var).ok());
    serde_json::from_str(&interpolated).with_context(|| format!("parsing {}", path.display()))
}

fn interpolate(text: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    shellexpand::env_with_context_no_errors(text, |var: &str| {
        Some(lookup(var).unwrap_or_default())
    })
    .into_owned()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

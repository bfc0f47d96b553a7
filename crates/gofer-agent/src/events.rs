// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token accounting attached to assistant and result events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

/// One decoded event from the agent's newline-delimited JSON stream.
///
/// The catalog beyond `system|init`, `assistant`, and `result` is not
/// contractual: anything else becomes [`StreamEvent::Unknown`] carrying the
/// original object, so a new agent release never breaks decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    SessionInit { session_id: String },
    AssistantText { delta: String },
    AssistantThinking { delta: String },
    ToolUse { name: String, input: Value },
    ToolProgress { raw: Value },
    Result { usage: Usage, duration_ms: u64 },
    Unknown { raw: Value },
}

/// Decode one stream line into its events. An `assistant` message carries a
/// list of content blocks, so a single line can yield several events.
pub fn decode_line(line: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    Ok(decode_value(value))
}

fn decode_value(value: Value) -> Vec<StreamEvent> {
    let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
    match kind {
        "system" => match value.get("session_id").and_then(Value::as_str) {
            Some(id) => vec![StreamEvent::SessionInit {
                session_id: id.to_string(),
            }],
            None => vec![StreamEvent::Unknown { raw: value }],
        },
        "assistant" => decode_assistant(&value),
        "result" => {
            let usage = value
                .get("usage")
                .cloned()
                .and_then(|u| serde_json::from_value(u).ok())
                .unwrap_or_default();
            let duration_ms = value
                .get("duration_ms")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            vec![StreamEvent::Result { usage, duration_ms }]
        }
        "progress" => vec![StreamEvent::ToolProgress { raw: value }],
        _ => vec![StreamEvent::Unknown { raw: value }],
    }
}

fn decode_assistant(value: &Value) -> Vec<StreamEvent> {
    let blocks = match value.pointer("/message/content").and_then(Value::as_array) {
        Some(b) => b,
        None => return vec![StreamEvent::Unknown { raw: value.clone() }],
    };

    let mut events = Vec::with_capacity(blocks.len());
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    events.push(StreamEvent::AssistantText {
                        delta: text.to_string(),
                    });
                }
            }
            Some("thinking") => {
                if let Some(text) = block.get("thinking").and_then(Value::as_str) {
                    events.push(StreamEvent::AssistantThinking {
                        delta: text.to_string(),
                    });
                }
            }
            Some("tool_use") => {
                events.push(StreamEvent::ToolUse {
                    name: block
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                    input: block.get("input").cloned().unwrap_or(Value::Null),
                });
            }
            _ => events.push(StreamEvent::Unknown { raw: block.clone() }),
        }
    }
    events
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

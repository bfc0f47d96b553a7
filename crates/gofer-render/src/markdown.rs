// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Markdown → chat-HTML conversion.
//!
//! The chat platform accepts a small HTML subset (`b i code pre a
//! blockquote`), so the converter escapes first, keeps code spans
//! byte-identical through placeholder substitution, and only then applies
//! inline transforms. Placeholders use private-use codepoints that cannot
//! occur in user text after escaping.

use std::sync::OnceLock;

use regex::Regex;

const STASH_OPEN: char = '\u{E000}';
const STASH_CLOSE: char = '\u{E001}';

/// Escape `& < >` for HTML. Idempotent: text that already contains entities
/// (`&amp;`, `&lt;`, `&#39;`) passes through unchanged.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < input.len() {
        let ch = input[i..].chars().next().expect("char boundary");
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => {
                if entity_len(&bytes[i..]).is_some() {
                    out.push('&');
                } else {
                    out.push_str("&amp;");
                }
            }
            c => out.push(c),
        }
        i += ch.len_utf8();
    }
    out
}

/// Length of a recognized entity at the start of `rest`, if any.
fn entity_len(rest: &[u8]) -> Option<usize> {
    const NAMED: [&str; 4] = ["&amp;", "&lt;", "&gt;", "&quot;"];
    for name in NAMED {
        if rest.starts_with(name.as_bytes()) {
            return Some(name.len());
        }
    }
    // Numeric entities: &#123; or &#x1F;
    if rest.starts_with(b"&#") {
        let digits = &rest[2..];
        let (digits, offset) = match digits.first() {
            Some(b'x') | Some(b'X') => (&digits[1..], 3),
            _ => (digits, 2),
        };
        let count = digits
            .iter()
            .take_while(|b| b.is_ascii_hexdigit())
            .count();
        if count > 0 && digits.get(count) == Some(&b';') {
            return Some(offset + count + 1);
        }
    }
    None
}

/// Convert markdown text into the platform's restricted HTML subset.
pub fn markdown_to_html(input: &str) -> String {
    let mut stash: Vec<String> = Vec::new();

    let text = stash_fenced_blocks(input, &mut stash);
    let text = stash_inline_code(&text, &mut stash);
    let text = escape_html(&text);
    let text = block_transforms(&text);
    let text = inline_transforms(&text);
    restore_stash(&text, &stash)
}

fn stash_placeholder(index: usize) -> String {
    format!("{STASH_OPEN}{index}{STASH_CLOSE}")
}

fn stash_fenced_blocks(input: &str, stash: &mut Vec<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find("```") {
        let after_open = &rest[open + 3..];
        let Some(close) = after_open.find("```") else {
            break;
        };
        out.push_str(&rest[..open]);
        // Drop the optional language tag on the opening line.
        let body = &after_open[..close];
        let code = match body.split_once('\n') {
            Some((first, tail)) if !first.trim().is_empty() && !first.contains(' ') => tail,
            _ => body.strip_prefix('\n').unwrap_or(body),
        };
        stash.push(format!("<pre>{}</pre>", escape_html(code.trim_end_matches('\n'))));
        out.push_str(&stash_placeholder(stash.len() - 1));
        rest = &after_open[close + 3..];
    }
    out.push_str(rest);
    out
}

fn stash_inline_code(input: &str, stash: &mut Vec<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find('`') {
        let after_open = &rest[open + 1..];
        let Some(close) = after_open.find('`') else {
            break;
        };
        out.push_str(&rest[..open]);
        stash.push(format!("<code>{}</code>", escape_html(&after_open[..close])));
        out.push_str(&stash_placeholder(stash.len() - 1));
        rest = &after_open[close + 1..];
    }
    out.push_str(rest);
    out
}

/// Per-line transforms: headings, blockquotes, bullet glyphs.
fn block_transforms(input: &str) -> String {
    let mut lines = Vec::new();
    for line in input.split('\n') {
        let trimmed = line.trim_start();
        let indent = &line[..line.len() - trimmed.len()];
        let converted = if let Some(rest) = heading_text(trimmed) {
            format!("{indent}<b>{rest}</b>")
        } else if let Some(rest) = trimmed.strip_prefix("&gt; ") {
            format!("{indent}<blockquote>{rest}</blockquote>")
        } else if let Some(rest) = trimmed.strip_prefix("- ") {
            format!("{indent}• {rest}")
        } else if let Some(rest) = trimmed.strip_prefix("* ") {
            format!("{indent}• {rest}")
        } else {
            line.to_string()
        };
        lines.push(converted);
    }
    lines.join("\n")
}

fn heading_text(line: &str) -> Option<&str> {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if (1..=6).contains(&hashes) {
        line[hashes..].strip_prefix(' ')
    } else {
        None
    }
}

fn inline_transforms(input: &str) -> String {
    static BOLD: OnceLock<Regex> = OnceLock::new();
    static BOLD_US: OnceLock<Regex> = OnceLock::new();
    static ITALIC: OnceLock<Regex> = OnceLock::new();
    static LINK: OnceLock<Regex> = OnceLock::new();

    let bold = BOLD.get_or_init(|| Regex::new(r"\*\*([^*\n]+)\*\*").expect("static regex"));
    let bold_us = BOLD_US.get_or_init(|| Regex::new(r"__([^_\n]+)__").expect("static regex"));
    let italic = ITALIC.get_or_init(|| Regex::new(r"\*([^*\n]+)\*").expect("static regex"));
    let link = LINK
        .get_or_init(|| Regex::new(r"\[([^\]\n]+)\]\(([^)\s]+)\)").expect("static regex"));

    let text = link.replace_all(input, r#"<a href="$2">$1</a>"#);
    let text = bold.replace_all(&text, "<b>$1</b>");
    let text = bold_us.replace_all(&text, "<b>$1</b>");
    let text = italic.replace_all(&text, "<i>$1</i>");
    text.into_owned()
}

fn restore_stash(input: &str, stash: &[String]) -> String {
    let mut out = input.to_string();
    for (i, content) in stash.iter().enumerate() {
        out = out.replace(&stash_placeholder(i), content);
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

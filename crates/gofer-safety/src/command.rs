// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use crate::paths::PathPolicy;

/// Decision for one shell command the agent wants to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandVerdict {
    Allow,
    Deny(String),
}

impl CommandVerdict {
    pub fn is_denied(&self) -> bool {
        matches!(self, CommandVerdict::Deny(_))
    }
}

/// Shell-command screening. Defense in depth only — the agent's system
/// prompt carries the primary policy; this catches what slips through.
#[derive(Debug)]
pub struct CommandPolicy {
    blocked_patterns: Vec<String>,
    paths: Arc<PathPolicy>,
}

impl CommandPolicy {
    pub fn new(blocked_patterns: Vec<String>, paths: Arc<PathPolicy>) -> Self {
        Self {
            blocked_patterns,
            paths,
        }
    }

    /// Screen `command` as it would run with `cwd` as working directory.
    pub fn check_command(&self, command: &str, cwd: &Path) -> CommandVerdict {
        for pattern in &self.blocked_patterns {
            if command.contains(pattern.as_str()) {
                warn!(%pattern, "blocked command pattern matched");
                return CommandVerdict::Deny(format!("matches blocked pattern '{pattern}'"));
            }
        }

        if let Some(args) = rm_arguments(command) {
            for arg in args {
                let resolved = resolve_against(cwd, &arg);
                if !self.paths.is_path_allowed(&resolved.to_string_lossy()) {
                    warn!(target_path = %arg, "rm target outside allowed directories");
                    return CommandVerdict::Deny(format!(
                        "rm target '{arg}' is outside the allowed directories"
                    ));
                }
            }
        }

        CommandVerdict::Allow
    }
}

/// If the command's first real token is `rm`, return its non-flag arguments.
/// Leading environment assignments (`FOO=bar rm ...`) are skipped.
fn rm_arguments(command: &str) -> Option<Vec<String>> {
    let mut tokens = command.split_whitespace().peekable();
    while let Some(tok) = tokens.peek() {
        if is_env_assignment(tok) {
            tokens.next();
        } else {
            break;
        }
    }
    match tokens.next() {
        Some("rm") => Some(
            tokens
                .filter(|t| !t.starts_with('-'))
                .map(str::to_string)
                .collect(),
        ),
        _ => None,
    }
}

fn is_env_assignment(token: &str) -> bool {
    match token.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !name.chars().next().unwrap().is_ascii_digit()
        }
        None => false,
    }
}

fn resolve_against(cwd: &Path, arg: &str) -> PathBuf {
    let expanded = shellexpand::tilde(arg).into_owned();
    let path = Path::new(&expanded);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_in(dir: &Path) -> CommandPolicy {
        let paths = Arc::new(PathPolicy::new(vec![dir.to_path_buf()], vec![]));
        CommandPolicy::new(vec!["rm -rf /".into(), "dd if=".into()], paths)
    }

    // ── Blocked patterns ──────────────────────────────────────────────────────

    #[test]
    fn blocked_pattern_matches_verbatim_substring() {
        let dir = tempfile::tempdir().unwrap();
        let p = policy_in(dir.path());
        let v = p.check_command("bash -c 'rm -rf /tmp/../..'", dir.path());
        // The literal "rm -rf /" appears inside the wrapped command.
        assert!(v.is_denied());
    }

    #[test]
    fn deny_reason_names_the_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let p = policy_in(dir.path());
        match p.check_command("dd if=/dev/zero of=/dev/sda", dir.path()) {
            CommandVerdict::Deny(reason) => assert!(reason.contains("dd if=")),
            CommandVerdict::Allow => panic!("should be denied"),
        }
    }

    #[test]
    fn harmless_command_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let p = policy_in(dir.path());
        assert_eq!(
            p.check_command("cargo test --workspace", dir.path()),
            CommandVerdict::Allow
        );
    }

    // ── rm argument screening ─────────────────────────────────────────────────

    #[test]
    fn rm_inside_workdir_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let p = policy_in(dir.path());
        assert_eq!(
            p.check_command("rm -f build/output.log", dir.path()),
            CommandVerdict::Allow
        );
    }

    #[test]
    fn rm_outside_workdir_is_denied_naming_the_argument() {
        let dir = tempfile::tempdir().unwrap();
        let p = policy_in(dir.path());
        match p.check_command("rm /etc/hosts", dir.path()) {
            CommandVerdict::Deny(reason) => assert!(reason.contains("/etc/hosts")),
            CommandVerdict::Allow => panic!("should be denied"),
        }
    }

    #[test]
    fn rm_flags_are_not_treated_as_paths() {
        let dir = tempfile::tempdir().unwrap();
        let p = policy_in(dir.path());
        assert_eq!(
            p.check_command("rm -rf --verbose stale/", dir.path()),
            CommandVerdict::Allow
        );
    }

    #[test]
    fn env_assignment_prefix_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let p = policy_in(dir.path());
        match p.check_command("FOO=bar rm /etc/hosts", dir.path()) {
            CommandVerdict::Deny(reason) => assert!(reason.contains("/etc/hosts")),
            CommandVerdict::Allow => panic!("env prefix must not hide rm"),
        }
    }

    #[test]
    fn rm_with_relative_escape_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let p = policy_in(dir.path());
        assert!(p
            .check_command("rm ../../etc/passwd", dir.path())
            .is_denied());
    }

    #[test]
    fn non_rm_command_skips_path_screening() {
        let dir = tempfile::tempdir().unwrap();
        let p = policy_in(dir.path());
        assert_eq!(
            p.check_command("cat /etc/hostname", dir.path()),
            CommandVerdict::Allow
        );
    }

    #[test]
    fn env_assignment_detection() {
        assert!(is_env_assignment("FOO=bar"));
        assert!(is_env_assignment("RUST_LOG=debug"));
        assert!(!is_env_assignment("rm"));
        assert!(!is_env_assignment("=x"));
        assert!(!is_env_assignment("a b=c"));
    }
}

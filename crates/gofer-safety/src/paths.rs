// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Component, Path, PathBuf};

use tracing::trace;

/// Decides which filesystem paths the agent may touch.
///
/// Containment is directory containment over canonicalized paths, never a
/// string-prefix test: `/foo-bar/x` is outside `/foo`.
#[derive(Debug)]
pub struct PathPolicy {
    /// Canonicalized at construction; entries that do not exist yet are kept
    /// as given and re-canonicalized on each check.
    allowed: Vec<PathBuf>,
    /// Prefixes that are always readable (downloaded media).
    temp_prefixes: Vec<PathBuf>,
}

impl PathPolicy {
    pub fn new(allowed: Vec<PathBuf>, temp_prefixes: Vec<PathBuf>) -> Self {
        let allowed = allowed
            .into_iter()
            .map(|p| p.canonicalize().unwrap_or(p))
            .collect();
        Self {
            allowed,
            temp_prefixes,
        }
    }

    /// Whether `raw` may be read or written by the agent.
    pub fn is_path_allowed(&self, raw: &str) -> bool {
        let expanded = expand_home(raw);
        let canonical = resolve(&expanded);

        for base in &self.allowed {
            let base = base.canonicalize().unwrap_or_else(|_| base.clone());
            if canonical == base || canonical.starts_with(&base) {
                return true;
            }
        }
        if self.is_temp_path(&expanded) {
            return true;
        }
        trace!(path = %canonical.display(), "path outside allowed directories");
        false
    }

    /// Reads get two extra carve-outs: downloaded media under a temp prefix,
    /// and the agent's own `.claude` state directories.
    pub fn is_read_allowed(&self, raw: &str) -> bool {
        if self.is_path_allowed(raw) {
            return true;
        }
        let expanded = expand_home(raw);
        expanded
            .components()
            .any(|c| c.as_os_str() == ".claude")
    }

    pub fn is_temp_path(&self, path: &Path) -> bool {
        self.temp_prefixes.iter().any(|p| path.starts_with(p))
    }
}

fn expand_home(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

/// Canonicalize `path`, resolving symlinks. When the leaf does not exist
/// yet, canonicalize the deepest existing ancestor and re-append the
/// unresolved tail, so a write to a new file inside a symlinked directory is
/// still judged by its real location.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(real) = path.canonicalize() {
        return real;
    }
    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    while !existing.exists() {
        match existing.file_name() {
            Some(name) => {
                tail.push(name.to_os_string());
                existing.pop();
            }
            None => break,
        }
        if existing.as_os_str().is_empty() {
            break;
        }
    }
    let mut resolved = existing.canonicalize().unwrap_or(existing);
    for part in tail.iter().rev() {
        resolved.push(part);
    }
    normalize_dots(&resolved)
}

/// Remove `.` and fold `..` components that survive in the unresolved tail.
fn normalize_dots(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(allowed: &Path) -> PathPolicy {
        PathPolicy::new(vec![allowed.to_path_buf()], vec![PathBuf::from("/tmp/gofer")])
    }

    #[test]
    fn allowed_dir_itself_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let p = policy(dir.path());
        assert!(p.is_path_allowed(dir.path().to_str().unwrap()));
    }

    #[test]
    fn file_beneath_allowed_dir_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("src/main.rs");
        let p = policy(dir.path());
        assert!(p.is_path_allowed(file.to_str().unwrap()));
    }

    #[test]
    fn sibling_with_shared_string_prefix_is_denied() {
        let base = tempfile::tempdir().unwrap();
        let allowed = base.path().join("proj");
        let evil = base.path().join("proj-evil");
        std::fs::create_dir_all(&allowed).unwrap();
        std::fs::create_dir_all(&evil).unwrap();
        let p = policy(&allowed);
        assert!(!p.is_path_allowed(evil.join("x").to_str().unwrap()));
    }

    #[test]
    fn parent_traversal_escapes_are_denied() {
        let dir = tempfile::tempdir().unwrap();
        let p = policy(dir.path());
        let sneaky = format!("{}/sub/../../etc/passwd", dir.path().display());
        assert!(!p.is_path_allowed(&sneaky));
    }

    #[test]
    fn parent_traversal_back_inside_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        let p = policy(dir.path());
        let dotted = format!("{}/a/../b.txt", dir.path().display());
        assert!(p.is_path_allowed(&dotted));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_pointing_outside_is_denied() {
        let allowed = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let link = allowed.path().join("escape");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();
        let p = policy(allowed.path());
        assert!(!p.is_path_allowed(link.join("x").to_str().unwrap()));
    }

    #[test]
    fn nonexistent_leaf_in_allowed_dir_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let p = policy(dir.path());
        let new_file = dir.path().join("does/not/exist/yet.txt");
        assert!(p.is_path_allowed(new_file.to_str().unwrap()));
    }

    #[test]
    fn temp_prefix_is_always_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let p = policy(dir.path());
        assert!(p.is_path_allowed("/tmp/gofer/photo_1.jpg"));
    }

    #[test]
    fn outside_everything_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let p = policy(dir.path());
        assert!(!p.is_path_allowed("/etc/shadow"));
    }

    #[test]
    fn claude_state_dir_is_readable_but_not_writable() {
        let dir = tempfile::tempdir().unwrap();
        let p = policy(dir.path());
        assert!(p.is_read_allowed("/home/user/.claude/settings.json"));
        assert!(!p.is_path_allowed("/home/user/.claude/settings.json"));
    }
}

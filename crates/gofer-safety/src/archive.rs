// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

/// Hard limits applied while unpacking an untrusted archive.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveLimits {
    pub max_files: usize,
    pub max_bytes_per_file: u64,
    pub max_total_bytes: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_files: 100,
            max_bytes_per_file: 10 * 1024 * 1024,
            max_total_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("unsupported archive format: {0}")]
    Unsupported(String),
    #[error("unsafe entry path '{0}'")]
    UnsafePath(String),
    #[error("refusing non-regular entry '{0}'")]
    SpecialEntry(String),
    #[error("archive exceeds limits: {0}")]
    LimitExceeded(String),
    #[error("corrupt archive: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Unpack `archive` into `dest`, enforcing [`ArchiveLimits`] and rejecting
/// every entry that could write outside `dest`: absolute paths, parent
/// traversal, drive prefixes, and non-regular entries (symlinks, hardlinks,
/// devices, fifos). On any violation `dest` is destroyed before returning.
///
/// Returns the relative paths of the extracted files.
pub fn safe_extract_archive(
    archive: &Path,
    dest: &Path,
    limits: &ArchiveLimits,
) -> Result<Vec<PathBuf>, ArchiveError> {
    std::fs::create_dir_all(dest)?;
    let result = match archive_kind(archive) {
        Some(Kind::Zip) => extract_zip(archive, dest, limits),
        Some(Kind::Tar) => extract_tar(File::open(archive)?, dest, limits),
        Some(Kind::TarGz) => extract_tar(
            flate2::read::GzDecoder::new(File::open(archive)?),
            dest,
            limits,
        ),
        None => Err(ArchiveError::Unsupported(
            archive
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_else(|| "<none>".into()),
        )),
    };
    if result.is_err() {
        warn!(archive = %archive.display(), "extraction failed, removing destination");
        let _ = std::fs::remove_dir_all(dest);
    }
    result
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
/// Repeated application is a fixed point.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

enum Kind {
    Zip,
    Tar,
    TarGz,
}

fn archive_kind(path: &Path) -> Option<Kind> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    if name.ends_with(".zip") {
        Some(Kind::Zip)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(Kind::TarGz)
    } else if name.ends_with(".tar") {
        Some(Kind::Tar)
    } else {
        None
    }
}

/// A path is safe when every component is a normal name: no root, no drive
/// prefix, no `..`.
fn checked_relative(raw: &str) -> Result<PathBuf, ArchiveError> {
    let path = Path::new(raw);
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) | Component::ParentDir => {
                return Err(ArchiveError::UnsafePath(raw.to_string()))
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(ArchiveError::UnsafePath(raw.to_string()));
    }
    Ok(out)
}

fn extract_zip(
    archive: &Path,
    dest: &Path,
    limits: &ArchiveLimits,
) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?)
        .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;

    let mut extracted = Vec::new();
    let mut total_bytes = 0u64;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
        let raw_name = entry.name().to_string();

        if entry.is_dir() {
            continue;
        }
        // Symlinks carry S_IFLNK in the external attributes on unix zips.
        if let Some(mode) = entry.unix_mode() {
            if mode & 0o170000 == 0o120000 {
                return Err(ArchiveError::SpecialEntry(raw_name));
            }
        }
        let rel = checked_relative(&raw_name)?;

        if extracted.len() + 1 > limits.max_files {
            return Err(ArchiveError::LimitExceeded(format!(
                "more than {} files",
                limits.max_files
            )));
        }

        let target = dest.join(&rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        // Cap the copy at the declared size + 1 so a lying header cannot
        // bloat past the per-file limit.
        let copied = std::io::copy(&mut (&mut entry).take(limits.max_bytes_per_file + 1), &mut out)?;
        if copied > limits.max_bytes_per_file {
            return Err(ArchiveError::LimitExceeded(format!(
                "'{raw_name}' exceeds {} bytes",
                limits.max_bytes_per_file
            )));
        }
        total_bytes += copied;
        if total_bytes > limits.max_total_bytes {
            return Err(ArchiveError::LimitExceeded(format!(
                "total size exceeds {} bytes",
                limits.max_total_bytes
            )));
        }
        extracted.push(rel);
    }

    debug!(files = extracted.len(), total_bytes, "archive extracted");
    Ok(extracted)
}

fn extract_tar<R: Read>(
    reader: R,
    dest: &Path,
    limits: &ArchiveLimits,
) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut tar = tar::Archive::new(reader);
    let mut extracted = Vec::new();
    let mut total_bytes = 0u64;

    for entry in tar.entries()? {
        let mut entry = entry?;
        let raw_name = entry.path()?.to_string_lossy().into_owned();

        match entry.header().entry_type() {
            tar::EntryType::Regular => {}
            tar::EntryType::Directory => continue,
            _ => return Err(ArchiveError::SpecialEntry(raw_name)),
        }
        let rel = checked_relative(&raw_name)?;

        if extracted.len() + 1 > limits.max_files {
            return Err(ArchiveError::LimitExceeded(format!(
                "more than {} files",
                limits.max_files
            )));
        }

        let target = dest.join(&rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        let copied = std::io::copy(&mut (&mut entry).take(limits.max_bytes_per_file + 1), &mut out)?;
        if copied > limits.max_bytes_per_file {
            return Err(ArchiveError::LimitExceeded(format!(
                "'{raw_name}' exceeds {} bytes",
                limits.max_bytes_per_file
            )));
        }
        total_bytes += copied;
        if total_bytes > limits.max_total_bytes {
            return Err(ArchiveError::LimitExceeded(format!(
                "total size exceeds {} bytes",
                limits.max_total_bytes
            )));
        }
        extracted.push(rel);
    }

    debug!(files = extracted.len(), total_bytes, "archive extracted");
    Ok(extracted)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut w = zip::ZipWriter::new(File::create(path).unwrap());
        let opts = zip::write::SimpleFileOptions::default();
        for (name, data) in entries {
            w.start_file(*name, opts).unwrap();
            w.write_all(data).unwrap();
        }
        w.finish().unwrap();
    }

    fn write_tar(path: &Path, entries: &[(&str, &[u8])]) {
        let mut b = tar::Builder::new(File::create(path).unwrap());
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            b.append_data(&mut header, name, *data).unwrap();
        }
        b.finish().unwrap();
    }

    // ── Happy path ────────────────────────────────────────────────────────────

    #[test]
    fn zip_extracts_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("in.zip");
        let dest = dir.path().join("out");
        write_zip(&archive, &[("a.txt", b"alpha"), ("sub/b.txt", b"beta")]);

        let files = safe_extract_archive(&archive, &dest, &ArchiveLimits::default()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(std::fs::read(dest.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(std::fs::read(dest.join("sub/b.txt")).unwrap(), b"beta");
    }

    #[test]
    fn tar_extracts_files() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("in.tar");
        let dest = dir.path().join("out");
        write_tar(&archive, &[("notes.md", b"# hi")]);

        let files = safe_extract_archive(&archive, &dest, &ArchiveLimits::default()).unwrap();
        assert_eq!(files, vec![PathBuf::from("notes.md")]);
    }

    // ── Traversal and special entries ─────────────────────────────────────────

    #[test]
    fn parent_traversal_entry_fails_and_destroys_dest() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        let dest = dir.path().join("out");
        write_zip(&archive, &[("ok.txt", b"x"), ("../escape.txt", b"y")]);

        let err = safe_extract_archive(&archive, &dest, &ArchiveLimits::default()).unwrap_err();
        assert!(matches!(err, ArchiveError::UnsafePath(_)));
        assert!(!dest.exists(), "dest must be removed after a violation");
    }

    #[test]
    fn absolute_path_entry_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("abs.tar");
        let dest = dir.path().join("out");
        // tar::Builder refuses absolute paths itself, so exercise the
        // validator directly as well.
        assert!(checked_relative("/etc/passwd").is_err());
        write_tar(&archive, &[("fine.txt", b"x")]);
        assert!(safe_extract_archive(&archive, &dest, &ArchiveLimits::default()).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_entry_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("link.tar");
        let dest = dir.path().join("out");

        let mut b = tar::Builder::new(File::create(&archive).unwrap());
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_cksum();
        b.append_link(&mut header, "evil", "/etc/passwd").unwrap();
        b.finish().unwrap();

        let err = safe_extract_archive(&archive, &dest, &ArchiveLimits::default()).unwrap_err();
        assert!(matches!(err, ArchiveError::SpecialEntry(_)));
        assert!(!dest.exists());
    }

    // ── Limits ────────────────────────────────────────────────────────────────

    #[test]
    fn too_many_files_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("many.zip");
        let dest = dir.path().join("out");
        let names: Vec<String> = (0..4).map(|i| format!("f{i}.txt")).collect();
        let entries: Vec<(&str, &[u8])> =
            names.iter().map(|n| (n.as_str(), b"x" as &[u8])).collect();
        write_zip(&archive, &entries);

        let limits = ArchiveLimits {
            max_files: 3,
            ..Default::default()
        };
        let err = safe_extract_archive(&archive, &dest, &limits).unwrap_err();
        assert!(matches!(err, ArchiveError::LimitExceeded(_)));
        assert!(!dest.exists());
    }

    #[test]
    fn oversized_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("big.zip");
        let dest = dir.path().join("out");
        write_zip(&archive, &[("big.bin", &[0u8; 2048])]);

        let limits = ArchiveLimits {
            max_bytes_per_file: 1024,
            ..Default::default()
        };
        let err = safe_extract_archive(&archive, &dest, &limits).unwrap_err();
        assert!(matches!(err, ArchiveError::LimitExceeded(_)));
        assert!(!dest.exists());
    }

    #[test]
    fn total_bytes_cap_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("sum.zip");
        let dest = dir.path().join("out");
        write_zip(&archive, &[("a", &[0u8; 800]), ("b", &[0u8; 800])]);

        let limits = ArchiveLimits {
            max_total_bytes: 1000,
            ..Default::default()
        };
        let err = safe_extract_archive(&archive, &dest, &limits).unwrap_err();
        assert!(matches!(err, ArchiveError::LimitExceeded(_)));
    }

    #[test]
    fn unsupported_extension_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("x.rar");
        std::fs::write(&archive, b"junk").unwrap();
        let err =
            safe_extract_archive(&archive, &dir.path().join("out"), &ArchiveLimits::default())
                .unwrap_err();
        assert!(matches!(err, ArchiveError::Unsupported(_)));
    }

    // ── Name sanitizer ────────────────────────────────────────────────────────

    #[test]
    fn sanitize_replaces_forbidden_chars() {
        assert_eq!(sanitize_name("my file (1).txt"), "my_file__1_.txt");
        assert_eq!(sanitize_name("läge.zip"), "l_ge.zip");
    }

    #[test]
    fn sanitize_is_a_fixed_point() {
        let once = sanitize_name("a/b\\c d.txt");
        assert_eq!(sanitize_name(&once), once);
    }

    #[test]
    fn sanitize_keeps_safe_names_unchanged() {
        assert_eq!(sanitize_name("report-2026_v1.pdf"), "report-2026_v1.pdf");
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Inbound media preparation: voice transcription, PDF text extraction,
//! archive intake. Everything here runs before the agent is involved; a
//! failure produces a short user-visible error instead of a query.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use gofer_agent::RunError;
use gofer_safety::{safe_extract_archive, ArchiveLimits};

/// Largest document we download at all.
pub const MAX_DOCUMENT_BYTES: u64 = 10 * 1024 * 1024;
/// Per text file read back out of an archive.
const MAX_ARCHIVE_FILE_BYTES: u64 = 100 * 1024;
/// Total archive content handed to the agent.
const MAX_ARCHIVE_TOTAL_BYTES: usize = 1024 * 1024;
/// Ceiling for any extracted text entering a prompt.
pub const MAX_PROMPT_TEXT_BYTES: usize = 50 * 1024;

const PDF_TIMEOUT: Duration = Duration::from_secs(30);

/// Speech-to-text port.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, ogg: &[u8]) -> Result<String, RunError>;
}

/// OpenAI-compatible `audio/transcriptions` adapter.
pub struct WhisperHttp {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl WhisperHttp {
    pub fn new(api_key: String, endpoint: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            endpoint: endpoint
                .unwrap_or_else(|| "https://api.openai.com/v1/audio/transcriptions".into()),
        }
    }
}

#[async_trait]
impl Transcriber for WhisperHttp {
    async fn transcribe(&self, ogg: &[u8]) -> Result<String, RunError> {
        let part = reqwest::multipart::Part::bytes(ogg.to_vec())
            .file_name("voice.ogg")
            .mime_str("audio/ogg")
            .map_err(|e| RunError::Transcription(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("model", "whisper-1")
            .part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RunError::Transcription(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RunError::Transcription(format!(
                "transcription endpoint returned {}",
                response.status()
            )));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RunError::Transcription(e.to_string()))?;
        body.get("text")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| RunError::Transcription("no text in response".into()))
    }
}

/// Always fails; used when no transcription key is configured.
pub struct NoTranscriber;

#[async_trait]
impl Transcriber for NoTranscriber {
    async fn transcribe(&self, _ogg: &[u8]) -> Result<String, RunError> {
        Err(RunError::Transcription(
            "voice transcription is not configured".into(),
        ))
    }
}

/// Extract text from a PDF with the external `pdftotext` tool.
pub async fn pdf_to_text(path: &Path) -> Result<String, RunError> {
    let mut cmd = tokio::process::Command::new("pdftotext");
    cmd.arg("-layout").arg(path).arg("-");
    let result = tokio::time::timeout(PDF_TIMEOUT, cmd.output()).await;
    match result {
        Ok(Ok(output)) if output.status.success() => {
            let text = String::from_utf8_lossy(&output.stdout).into_owned();
            Ok(clip_text(&text, MAX_PROMPT_TEXT_BYTES))
        }
        Ok(Ok(output)) => Err(RunError::Extraction(format!(
            "pdftotext exited with {}",
            output.status.code().unwrap_or(-1)
        ))),
        Ok(Err(e)) => Err(RunError::Extraction(format!("running pdftotext: {e}"))),
        Err(_) => Err(RunError::Extraction("pdftotext timed out".into())),
    }
}

/// Unpack an archive safely and read its text files back, bounded by the
/// per-file and total caps. Returns a prompt-ready digest.
pub fn archive_digest(archive: &Path, scratch: &Path) -> Result<String, RunError> {
    let dest = scratch.join(format!(
        "unpacked-{}",
        archive
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".into())
    ));
    let files = safe_extract_archive(archive, &dest, &ArchiveLimits::default())
        .map_err(|e| RunError::Extraction(e.to_string()))?;

    let mut digest = format!("Archive contents ({} files):\n", files.len());
    let mut total = 0usize;
    for rel in &files {
        digest.push_str(&format!("- {}\n", rel.display()));
    }
    for rel in &files {
        if total >= MAX_ARCHIVE_TOTAL_BYTES {
            digest.push_str("\n[remaining files omitted: total content cap reached]\n");
            break;
        }
        let path = dest.join(rel);
        let Ok(meta) = std::fs::metadata(&path) else {
            continue;
        };
        if meta.len() > MAX_ARCHIVE_FILE_BYTES {
            debug!(file = %rel.display(), "archive file too large to inline");
            continue;
        }
        let Ok(bytes) = std::fs::read(&path) else {
            continue;
        };
        let Ok(text) = String::from_utf8(bytes) else {
            continue; // binary file, listed but not inlined
        };
        let snippet = clip_text(&text, MAX_ARCHIVE_TOTAL_BYTES - total);
        total += snippet.len();
        digest.push_str(&format!("\n--- {} ---\n{snippet}\n", rel.display()));
    }
    Ok(digest)
}

/// Whether a downloaded document should go through the archive path.
pub fn is_archive_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".zip") || lower.ends_with(".tar") || lower.ends_with(".tar.gz")
        || lower.ends_with(".tgz")
}

pub fn is_pdf_name(name: &str) -> bool {
    name.to_lowercase().ends_with(".pdf")
}

/// Clip to a byte budget on a char boundary.
pub fn clip_text(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut cut = limit;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    warn!(
        original = text.len(),
        kept = cut,
        "clipping extracted text to prompt budget"
    );
    format!("{}\n[truncated]", &text[..cut])
}

/// Build the prompt for a photo (or album) the user sent.
pub fn photo_prompt(paths: &[PathBuf], caption: Option<&str>) -> String {
    let mut prompt = String::new();
    if paths.len() == 1 {
        prompt.push_str(&format!("The user sent a photo: {}\n", paths[0].display()));
    } else {
        prompt.push_str(&format!("The user sent {} photos:\n", paths.len()));
        for p in paths {
            prompt.push_str(&format!("- {}\n", p.display()));
        }
    }
    prompt.push_str("Look at the image file(s) and respond to the user.\n");
    if let Some(caption) = caption {
        prompt.push_str(&format!("Caption: {caption}\n"));
    }
    prompt
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_names_are_detected() {
        assert!(is_archive_name("src.zip"));
        assert!(is_archive_name("backup.TAR.GZ"));
        assert!(is_archive_name("x.tgz"));
        assert!(!is_archive_name("paper.pdf"));
        assert!(!is_archive_name("notes.txt"));
    }

    #[test]
    fn clip_text_is_noop_under_limit() {
        assert_eq!(clip_text("short", 100), "short");
    }

    #[test]
    fn clip_text_respects_char_boundaries() {
        let s = "ü".repeat(100);
        let clipped = clip_text(&s, 15);
        assert!(clipped.starts_with(&"ü".repeat(7)));
        assert!(clipped.ends_with("[truncated]"));
    }

    #[test]
    fn photo_prompt_lists_all_paths_and_caption() {
        let p = photo_prompt(
            &["/tmp/gofer/a.jpg".into(), "/tmp/gofer/b.jpg".into()],
            Some("whiteboard"),
        );
        assert!(p.contains("2 photos"));
        assert!(p.contains("/tmp/gofer/a.jpg"));
        assert!(p.contains("Caption: whiteboard"));
    }

    #[test]
    fn archive_digest_lists_and_inlines_text() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("in.zip");
        {
            use std::io::Write;
            let mut w = zip_writer(&archive);
            w.start_file("README.md", zip::write::SimpleFileOptions::default())
                .unwrap();
            w.write_all(b"# hello archive").unwrap();
            w.finish().unwrap();
        }
        let digest = archive_digest(&archive, dir.path()).unwrap();
        assert!(digest.contains("Archive contents (1 files)"));
        assert!(digest.contains("README.md"));
        assert!(digest.contains("# hello archive"));
    }

    fn zip_writer(path: &Path) -> zip::ZipWriter<std::fs::File> {
        zip::ZipWriter::new(std::fs::File::create(path).unwrap())
    }

    #[tokio::test]
    async fn no_transcriber_reports_missing_config() {
        let t = NoTranscriber;
        let err = t.transcribe(b"oggdata").await.unwrap_err();
        assert!(matches!(err, RunError::Transcription(_)));
    }
}

use std::path::Path;
use std::sync::OnceLock;

use groundwork_core::{GroundworkError, GroundworkResult};
use regex::Regex;
use tracing::warn;

/// Source document formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// Portable Document Format, parsed with `lopdf`.
    Pdf,
    /// UTF-8 text (`.txt`, `.md`, `.text`). Invalid sequences are replaced.
    PlainText,
}

impl DocumentFormat {
    /// Detect the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" | "md" | "text" => Some(Self::PlainText),
            _ => None,
        }
    }
}

#[allow(clippy::expect_used)]
fn non_text_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Constant pattern.
    PATTERN.get_or_init(|| Regex::new(r"[^\w\s.]").expect("valid regex"))
}

#[allow(clippy::expect_used)]
fn whitespace_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// Normalize raw document text.
///
/// Every character that is not a word character, whitespace, or `.` becomes a
/// space; whitespace runs collapse to one space; the result is trimmed.
pub fn normalize_text(raw: &str) -> String {
    let cleaned = non_text_pattern().replace_all(raw, " ");
    let collapsed = whitespace_pattern().replace_all(&cleaned, " ");
    collapsed.trim().to_string()
}

/// Extract and normalize the text of one document.
///
/// Blocking: PDF parsing is CPU bound, so async callers should run this on
/// `spawn_blocking`.
pub fn extract_text(path: &Path) -> GroundworkResult<String> {
    let raw = match DocumentFormat::from_path(path) {
        Some(DocumentFormat::Pdf) => read_pdf(path)?,
        Some(DocumentFormat::PlainText) => read_plain(path)?,
        None => {
            return Err(GroundworkError::Extraction(format!(
                "unsupported document type: {}",
                path.display()
            )))
        }
    };
    Ok(normalize_text(&raw))
}

/// Like [`extract_text`], but a failure is logged and yields an empty string
/// so a batch job can skip the document and carry on.
pub fn extract_or_empty(path: &Path) -> String {
    match extract_text(path) {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Skipping document, extraction failed");
            String::new()
        }
    }
}

fn read_pdf(path: &Path) -> GroundworkResult<String> {
    let document = lopdf::Document::load(path)
        .map_err(|e| GroundworkError::Extraction(format!("{}: {}", path.display(), e)))?;

    let mut text = String::new();
    for page_number in document.get_pages().keys() {
        let page_text = document.extract_text(&[*page_number]).map_err(|e| {
            GroundworkError::Extraction(format!(
                "{}: page {}: {}",
                path.display(),
                page_number,
                e
            ))
        })?;
        text.push_str(&page_text);
        text.push(' ');
    }
    Ok(text)
}

fn read_plain(path: &Path) -> GroundworkResult<String> {
    let bytes = std::fs::read(path)
        .map_err(|e| GroundworkError::Extraction(format!("{}: {}", path.display(), e)))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

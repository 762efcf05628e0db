//! Document text extraction.
//!
//! PDFs are read page by page with lopdf so chunks can carry page numbers.
//! When lopdf yields nothing usable (scanned layouts, exotic encodings) the
//! whole document goes through pdf-extract instead, without page numbers.

use std::fs;
use std::path::{Path, PathBuf};

use lopdf::Document;
use tracing::{debug, warn};

use docqa_core::splitter::PageText;
use docqa_core::{Error, Result};

const SUPPORTED: &[&str] = &["pdf", "txt", "md"];

fn extension(name: &str) -> Option<String> {
    Path::new(name).extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase)
}

pub fn is_supported(name: &str) -> bool {
    extension(name).is_some_and(|ext| SUPPORTED.contains(&ext.as_str()))
}

/// Extracts the pages of an in-memory document. `name` picks the format by
/// extension and labels errors.
pub fn load_bytes(name: &str, bytes: &[u8]) -> Result<Vec<PageText>> {
    let pages = match extension(name).as_deref() {
        Some("pdf") => pdf_pages(name, bytes)?,
        Some("txt" | "md") => vec![PageText { number: None, text: String::from_utf8_lossy(bytes).into_owned() }],
        _ => return Err(Error::Extraction(format!("{name}: unsupported file type"))),
    };
    if pages.iter().all(|p| p.text.trim().is_empty()) {
        return Err(Error::EmptyDocument(name.to_string()));
    }
    Ok(pages)
}

pub fn load_path(path: &Path) -> Result<Vec<PageText>> {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let bytes = fs::read(path)?;
    load_bytes(&name, &bytes)
}

/// Supported documents under `root`, sorted for a stable ingestion order.
pub fn list_documents(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|p| p.file_name().and_then(|n| n.to_str()).is_some_and(is_supported))
        .collect();
    files.sort();
    files
}

fn pdf_pages(name: &str, bytes: &[u8]) -> Result<Vec<PageText>> {
    match per_page_text(bytes) {
        Ok(pages) if pages.iter().any(|p| !p.text.trim().is_empty()) => {
            debug!(name, pages = pages.len(), "pdf pages extracted");
            return Ok(pages);
        }
        Ok(_) => debug!(name, "no text through page extraction, trying whole-document extraction"),
        Err(e) => warn!(name, error = %e, "page extraction failed, trying whole-document extraction"),
    }
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| Error::Extraction(format!("{name}: {e}")))?;
    Ok(vec![PageText { number: None, text }])
}

fn per_page_text(bytes: &[u8]) -> std::result::Result<Vec<PageText>, lopdf::Error> {
    let doc = Document::load_mem(bytes)?;
    let mut pages = Vec::new();
    for number in doc.get_pages().into_keys() {
        match doc.extract_text(&[number]) {
            Ok(text) => pages.push(PageText { number: Some(number), text }),
            Err(e) => debug!(page = number, error = %e, "page has no extractable text"),
        }
    }
    Ok(pages)
}

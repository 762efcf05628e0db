//! Domain types shared by the index, the embedders and the retrieval pipeline.

use serde::{Deserialize, Serialize};

/// One retrievable text segment of a source document.
///
/// - `source`: originating document name (usually the uploaded file name)
/// - `text`: the raw chunk text, re-embedded on rebuild
/// - `page`: 1-based page number when the loader knows it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub source: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl Chunk {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self { source: source.into(), text: text.into(), page: None }
    }

    #[must_use]
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }
}

/// A document as seen through the index: its name and how many chunks it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub name: String,
    pub chunks: usize,
}

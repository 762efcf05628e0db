//! The application context: one index, one embedder, one language model and
//! the directory uploaded documents are kept in.
//!
//! Embedding and index mutations are blocking, so every operation that
//! reaches the index hops onto tokio's blocking pool.

use std::collections::{BTreeSet, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use docqa_core::config::{RetrievalSettings, Settings};
use docqa_core::splitter::TextSplitter;
use docqa_core::{Chunk, DocumentSummary, Embedder, Error, LanguageModel, Result};
use docqa_vector::IndexManager;

use crate::llm::GeminiClient;
use crate::loader;
use crate::prompt::{build_option_prompt, build_prompt, PostProcessOption};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub source: String,
    pub chunks_added: usize,
    pub total_chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RagAnswer {
    pub query: String,
    pub answer: String,
    /// Distinct sources of the retrieved contexts, sorted.
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AskOutcome {
    /// Nothing has been indexed yet.
    NoIndex,
    Answered(RagAnswer),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub filename: String,
    pub option: PostProcessOption,
    pub label: &'static str,
    pub result: String,
    /// `(source, page)` pairs in retrieval order, without repeats.
    pub sources: Vec<(String, Option<u32>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    NoIndex,
    Processed(ProcessResult),
}

const NO_CONTEXT: &str = "No relevant content found in the index for this document.";

/// Handle to the index cleanup scheduled by [`Workspace::delete_document`].
/// Dropping it detaches the task; it still runs to completion.
#[derive(Debug)]
pub struct DeleteTicket {
    name: String,
    raw_file_removed: bool,
    handle: JoinHandle<Result<usize>>,
}

impl DeleteTicket {
    /// The sanitized document name that was deleted.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw_file_removed(&self) -> bool {
        self.raw_file_removed
    }

    /// Waits for the cleanup and returns how many chunks it removed.
    pub async fn wait(self) -> Result<usize> {
        self.handle.await.map_err(|e| Error::Background(e.to_string()))?
    }
}

pub struct Workspace {
    index: Arc<IndexManager>,
    splitter: TextSplitter,
    llm: Arc<dyn LanguageModel>,
    raw_dir: PathBuf,
    retrieval: RetrievalSettings,
}

impl Workspace {
    /// Opens the persisted index (or starts empty) with the given providers.
    pub fn new(settings: &Settings, embedder: Arc<dyn Embedder>, llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            index: Arc::new(IndexManager::open(&settings.index, embedder)),
            splitter: TextSplitter::new(settings.splitter),
            llm,
            raw_dir: settings.data.raw_dir.clone(),
            retrieval: settings.retrieval.clone(),
        }
    }

    /// Builds the embedder and the Gemini client the settings describe.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let embedder = docqa_embed::embedder_from_settings(&settings.embedding)?;
        let llm = Arc::new(GeminiClient::from_settings(&settings.llm));
        Ok(Self::new(settings, embedder, llm))
    }

    pub fn index(&self) -> &Arc<IndexManager> {
        &self.index
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    pub fn default_k(&self) -> usize {
        self.retrieval.default_k
    }

    pub async fn ingest_file(&self, path: &Path) -> Result<IngestReport> {
        let name = sanitize_name(&path.to_string_lossy())?;
        let bytes = tokio::fs::read(path).await?;
        self.ingest_bytes(&name, bytes).await
    }

    /// Extracts, splits and indexes a document, keeps a copy in the raw
    /// directory and saves the index. The copy is only written once the
    /// chunks are indexed.
    pub async fn ingest_bytes(&self, name: &str, bytes: Vec<u8>) -> Result<IngestReport> {
        let source = sanitize_name(name)?;
        let index = Arc::clone(&self.index);
        let splitter = self.splitter.clone();
        let raw_path = self.raw_dir.join(&source);

        tokio::task::spawn_blocking(move || {
            let pages = loader::load_bytes(&source, &bytes)?;
            let chunks = splitter.split_pages(&source, &pages);
            if chunks.is_empty() {
                return Err(Error::EmptyDocument(source));
            }
            if index.documents().iter().any(|d| d.name == source) {
                warn!(source = %source, "document already indexed; its chunks will be appended again");
            }

            let chunks_added = chunks.len();
            let total_chunks = index.index_chunks(chunks)?;

            if let Some(dir) = raw_path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(&raw_path, &bytes)?;
            index.save()?;
            info!(source = %source, pages = pages.len(), chunks_added, total_chunks, "document ingested");
            Ok(IngestReport { source, chunks_added, total_chunks })
        })
        .await
        .map_err(|e| Error::Background(e.to_string()))?
    }

    /// Retrieves `k` contexts and asks the language model about them.
    pub async fn ask(&self, query: &str, k: usize) -> Result<AskOutcome> {
        if self.index.is_empty() {
            return Ok(AskOutcome::NoIndex);
        }
        let contexts = self.retrieve(query, k, None).await?;
        for (i, chunk) in contexts.iter().enumerate() {
            let snippet: String = chunk.text.chars().take(200).collect();
            debug!(rank = i + 1, source = %chunk.source, snippet = %snippet, "retrieved context");
        }

        let answer = self.llm.complete(&build_prompt(query, &contexts)).await?;
        let sources: BTreeSet<String> = contexts.into_iter().map(|c| c.source).collect();
        Ok(AskOutcome::Answered(RagAnswer {
            query: query.to_string(),
            answer,
            sources: sources.into_iter().collect(),
        }))
    }

    /// Runs a canned task over one document. Candidates are ranked against
    /// the file name, `k * process_fanout` deep; if none belong to the
    /// document the unfiltered ranking is used instead.
    pub async fn process(&self, filename: &str, option: PostProcessOption, k: usize) -> Result<ProcessOutcome> {
        if self.index.is_empty() {
            return Ok(ProcessOutcome::NoIndex);
        }
        let depth = k.max(1).saturating_mul(self.retrieval.process_fanout);
        let mut contexts = self.retrieve(filename, depth, Some(filename)).await?;
        if contexts.is_empty() {
            debug!(filename, "no chunks of the document ranked, using unfiltered contexts");
            contexts = self.retrieve(filename, depth, None).await?;
        }

        let result = if contexts.is_empty() {
            NO_CONTEXT.to_string()
        } else {
            self.llm.complete(&build_option_prompt(option, filename, &contexts)).await?
        };

        let mut seen = HashSet::new();
        let sources = contexts
            .into_iter()
            .map(|c| (c.source, c.page))
            .filter(|pair| seen.insert(pair.clone()))
            .collect();
        Ok(ProcessOutcome::Processed(ProcessResult {
            filename: filename.to_string(),
            option,
            label: option.label(),
            result,
            sources,
        }))
    }

    pub fn documents(&self) -> Vec<DocumentSummary> {
        self.index.documents()
    }

    /// Empties the index and removes its files. Raw documents are kept.
    pub async fn reset(&self) -> Result<()> {
        let index = Arc::clone(&self.index);
        tokio::task::spawn_blocking(move || index.reset())
            .await
            .map_err(|e| Error::Background(e.to_string()))?
    }

    /// Removes the raw file right away and schedules the index cleanup in
    /// the background. Cleanup failures are logged, never raised here.
    pub async fn delete_document(&self, id: &str) -> Result<DeleteTicket> {
        let name = sanitize_name(id)?;
        let raw_path = self.raw_dir.join(&name);
        let raw_file_removed = match tokio::fs::remove_file(&raw_path).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        let index = Arc::clone(&self.index);
        let source = name.clone();
        let handle = tokio::task::spawn_blocking(move || {
            info!(source = %source, "background index cleanup started");
            let outcome = index.delete_by_source(&source).and_then(|removed| {
                index.save()?;
                Ok(removed)
            });
            match &outcome {
                Ok(removed) => info!(source = %source, removed, "background index cleanup done"),
                Err(e) => error!(source = %source, error = %e, "background index cleanup failed"),
            }
            outcome
        });

        Ok(DeleteTicket { name, raw_file_removed, handle })
    }

    async fn retrieve(&self, query: &str, k: usize, source: Option<&str>) -> Result<Vec<Chunk>> {
        let index = Arc::clone(&self.index);
        let query = query.to_string();
        let source = source.map(str::to_string);
        tokio::task::spawn_blocking(move || index.retrieve_from(&query, k, source.as_deref()))
            .await
            .map_err(|e| Error::Background(e.to_string()))?
    }
}

/// Reduces a user-supplied document id to a bare file name, so it can never
/// address anything outside the raw directory.
pub fn sanitize_name(id: &str) -> Result<String> {
    let normalized = id.replace('\\', "/");
    Path::new(&normalized)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| Error::InvalidArgument(format!("'{id}' does not name a document")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_name("C:\\docs\\report.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize_name("plain.pdf").unwrap(), "plain.pdf");
        assert!(sanitize_name("..").is_err());
        assert!(sanitize_name("").is_err());
        assert!(sanitize_name("dir/").is_ok());
    }
}

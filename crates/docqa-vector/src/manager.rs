//! The index aggregate: a vector engine and a chunk store kept in positional
//! lockstep (vector `i` is the embedding of chunk `i`) behind one mutex.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use docqa_core::config::{EngineKind, IndexSettings};
use docqa_core::{Chunk, DocumentSummary, Embedder, Error, Result};

use crate::chunk_store::ChunkStore;
use crate::engine::{create_engine, decode_engine, VectorEngine};
use crate::persist;

/// A retrieved chunk with its squared L2 distance to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub distance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub vectors: usize,
    pub chunks: usize,
    pub dim: usize,
}

impl IndexStats {
    pub fn is_aligned(&self) -> bool {
        self.vectors == self.chunks
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Missing,
    Loaded(usize),
    /// The file was unreadable and replaced by an empty structure.
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub vectors: LoadOutcome,
    pub chunks: LoadOutcome,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        !matches!(self.vectors, LoadOutcome::Corrupt(_)) && !matches!(self.chunks, LoadOutcome::Corrupt(_))
    }
}

struct IndexState {
    engine: Box<dyn VectorEngine>,
    chunks: ChunkStore,
}

impl IndexState {
    fn is_aligned(&self) -> bool {
        self.engine.count() == self.chunks.len()
    }
}

pub struct IndexManager {
    state: Mutex<IndexState>,
    /// Chunk count published after every mutation; read without the lock.
    indexed: AtomicUsize,
    embedder: Arc<dyn Embedder>,
    kind: EngineKind,
    dim: usize,
    vector_path: PathBuf,
    meta_path: PathBuf,
    rebuild_batch_size: usize,
}

impl IndexManager {
    /// An empty manager; nothing is read from disk.
    pub fn new(settings: &IndexSettings, embedder: Arc<dyn Embedder>) -> Self {
        let dim = embedder.dim();
        Self {
            state: Mutex::new(IndexState { engine: create_engine(settings.engine, dim), chunks: ChunkStore::new() }),
            indexed: AtomicUsize::new(0),
            embedder,
            kind: settings.engine,
            dim,
            vector_path: settings.vector_path.clone(),
            meta_path: settings.meta_path.clone(),
            rebuild_batch_size: settings.rebuild_batch_size.max(1),
        }
    }

    /// Constructs the manager and restores whatever is persisted.
    pub fn open(settings: &IndexSettings, embedder: Arc<dyn Embedder>) -> Self {
        let manager = Self::new(settings, embedder);
        manager.load();
        manager
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn vector_path(&self) -> &Path {
        &self.vector_path
    }

    pub fn meta_path(&self) -> &Path {
        &self.meta_path
    }

    /// Number of indexed chunks. Lock-free and possibly stale by one
    /// in-flight mutation; good enough for "is anything indexed".
    pub fn count(&self) -> usize {
        self.indexed.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn stats(&self) -> IndexStats {
        let state = self.lock();
        IndexStats { vectors: state.engine.count(), chunks: state.chunks.len(), dim: self.dim }
    }

    pub fn documents(&self) -> Vec<DocumentSummary> {
        self.lock().chunks.documents()
    }

    pub fn chunks(&self) -> Vec<Chunk> {
        self.lock().chunks.as_slice().to_vec()
    }

    /// Appends pre-computed vectors and their chunks at matching positions.
    /// Nothing is applied unless every vector has the index width. A
    /// misaligned aggregate (after a partial load) is rebuilt first.
    pub fn add(&self, vectors: Vec<Vec<f32>>, metas: Vec<Chunk>) -> Result<usize> {
        if vectors.len() != metas.len() {
            return Err(Error::LengthMismatch { vectors: vectors.len(), chunks: metas.len() });
        }
        self.check_widths(&vectors)?;
        let mut state = self.lock();
        self.append_locked(&mut state, &vectors, metas)
    }

    /// Embeds the chunk texts and appends them. Embedding happens under the
    /// lock, so concurrent writers queue behind ingestion.
    pub fn index_chunks(&self, chunks: Vec<Chunk>) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(self.count());
        }
        let mut state = self.lock();
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.rebuild_batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = self.embedder.embed_batch(&texts)?;
            if embedded.len() != texts.len() {
                return Err(Error::ProviderUnavailable(format!(
                    "provider returned {} vectors for {} texts",
                    embedded.len(),
                    texts.len()
                )));
            }
            vectors.extend(embedded);
        }
        self.check_widths(&vectors)?;
        self.append_locked(&mut state, &vectors, chunks)
    }

    pub fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Chunk>> {
        self.retrieve_from(query, k, None)
    }

    /// Like [`retrieve`](Self::retrieve), restricted to chunks of `source`
    /// when given. The restriction is applied to the ranking, never to the
    /// stored metadata.
    pub fn retrieve_from(&self, query: &str, k: usize, source: Option<&str>) -> Result<Vec<Chunk>> {
        Ok(self.retrieve_scored(query, k, source)?.into_iter().map(|s| s.chunk).collect())
    }

    pub fn retrieve_scored(&self, query: &str, k: usize, source: Option<&str>) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be at least 1".to_string()));
        }
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let query_vector = self.embedder.embed_query(query)?;
        self.search_vector(&query_vector, k, source)
    }

    /// Nearest chunks to an already embedded query.
    pub fn search_vector(&self, query: &[f32], k: usize, source: Option<&str>) -> Result<Vec<ScoredChunk>> {
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: query.len() });
        }
        let state = self.lock();
        if state.chunks.is_empty() || state.engine.count() == 0 {
            return Ok(Vec::new());
        }
        let fetch = if source.is_some() { state.engine.count() } else { k };
        let hits = state.engine.search(query, fetch)?;
        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                // positions past the chunk store only exist after a partial load
                let chunk = state.chunks.get(hit.position)?;
                match source {
                    Some(s) if chunk.source != s => None,
                    _ => Some(ScoredChunk { chunk: chunk.clone(), distance: hit.distance }),
                }
            })
            .take(k)
            .collect())
    }

    /// Removes every chunk of `source` with its vector. Returns how many were
    /// removed; `0` leaves the index untouched.
    ///
    /// Engines with native removal drop the positions in place. Otherwise the
    /// survivors are re-embedded into a fresh engine, and the old state stays
    /// in place until that rebuild has fully succeeded.
    pub fn delete_by_source(&self, source: &str) -> Result<usize> {
        let mut state = self.lock();
        let positions = state.chunks.positions_of(source);
        if positions.is_empty() {
            debug!(source, "delete: no chunks for source");
            return Ok(0);
        }

        if state.engine.supports_removal() && state.is_aligned() {
            state.engine.remove(&positions)?;
            state.chunks = state.chunks.without_positions(&positions);
            info!(source, removed = positions.len(), retained = state.chunks.len(), "delete: removed in place");
        } else {
            let retained = state.chunks.without_positions(&positions);
            let engine = self.rebuild(&retained)?;
            *state = IndexState { engine, chunks: retained };
            info!(source, removed = positions.len(), retained = state.chunks.len(), "delete: index rebuilt");
        }
        self.publish(&state);
        Ok(positions.len())
    }

    /// Drops everything in memory and on disk. Idempotent.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.lock();
        *state = IndexState { engine: create_engine(self.kind, self.dim), chunks: ChunkStore::new() };
        self.publish(&state);
        persist::remove_if_exists(&self.vector_path)?;
        persist::remove_if_exists(&self.meta_path)?;
        info!("index reset");
        Ok(())
    }

    /// Writes the vector file then the metadata file, each atomically.
    pub fn save(&self) -> Result<()> {
        let state = self.lock();
        let bytes = state.engine.serialize();
        let json = state.chunks.to_json()?;
        persist::write_atomic(&self.vector_path, &bytes)?;
        persist::write_atomic(&self.meta_path, json.as_bytes())?;
        info!(
            chunks = state.chunks.len(),
            vectors = state.engine.count(),
            path = %self.vector_path.display(),
            "index saved"
        );
        Ok(())
    }

    /// Replaces the in-memory aggregate with the persisted one. Never fails:
    /// a missing or corrupt half is replaced by an empty structure.
    pub fn load(&self) -> LoadReport {
        let (engine, vectors) = self.load_engine();
        let (chunks, chunk_outcome) = self.load_chunks();

        let mut state = self.lock();
        *state = IndexState { engine, chunks };
        if !state.is_aligned() {
            warn!(
                vectors = state.engine.count(),
                chunks = state.chunks.len(),
                "loaded index is misaligned; retrieval may skip results until the next add, delete or reset"
            );
        }
        self.publish(&state);
        LoadReport { vectors, chunks: chunk_outcome }
    }

    fn load_engine(&self) -> (Box<dyn VectorEngine>, LoadOutcome) {
        let path = &self.vector_path;
        let decoded = match persist::read_optional(path) {
            Ok(None) => return (create_engine(self.kind, self.dim), LoadOutcome::Missing),
            Ok(Some(bytes)) => decode_engine(self.kind, self.dim, &bytes),
            Err(e) => Err(Error::Io(e)),
        };
        match decoded {
            Ok(engine) => {
                info!(path = %path.display(), vectors = engine.count(), "vector file loaded");
                let n = engine.count();
                (engine, LoadOutcome::Loaded(n))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "vector file unusable, starting with an empty engine");
                (create_engine(self.kind, self.dim), LoadOutcome::Corrupt(e.to_string()))
            }
        }
    }

    fn load_chunks(&self) -> (ChunkStore, LoadOutcome) {
        let path = &self.meta_path;
        let parsed = match persist::read_optional(path) {
            Ok(None) => return (ChunkStore::new(), LoadOutcome::Missing),
            Ok(Some(bytes)) => String::from_utf8(bytes)
                .map_err(|e| Error::PersistenceCorruption(e.to_string()))
                .and_then(|raw| ChunkStore::from_json(&raw)),
            Err(e) => Err(Error::Io(e)),
        };
        match parsed {
            Ok(store) => {
                info!(path = %path.display(), chunks = store.len(), "metadata loaded");
                let n = store.len();
                (store, LoadOutcome::Loaded(n))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "metadata file unusable, starting with an empty chunk store");
                (ChunkStore::new(), LoadOutcome::Corrupt(e.to_string()))
            }
        }
    }

    fn rebuild(&self, retained: &ChunkStore) -> Result<Box<dyn VectorEngine>> {
        let mut engine = create_engine(self.kind, self.dim);
        for (batch_no, batch) in retained.as_slice().chunks(self.rebuild_batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self
                .embedder
                .embed_batch(&texts)
                .map_err(|e| Error::RebuildFailure(format!("batch {batch_no}: {e}")))?;
            if vectors.len() != texts.len() {
                return Err(Error::RebuildFailure(format!(
                    "batch {batch_no}: provider returned {} vectors for {} texts",
                    vectors.len(),
                    texts.len()
                )));
            }
            engine
                .append(&vectors)
                .map_err(|e| Error::RebuildFailure(format!("batch {batch_no}: {e}")))?;
            debug!(batch_no, size = texts.len(), "rebuild batch embedded");
        }
        Ok(engine)
    }

    /// Appends at matching positions. A misaligned aggregate is first realigned
    /// by re-embedding its chunks; if that fails nothing is changed.
    fn append_locked(&self, state: &mut IndexState, vectors: &[Vec<f32>], metas: Vec<Chunk>) -> Result<usize> {
        if !state.is_aligned() {
            warn!(
                vectors = state.engine.count(),
                chunks = state.chunks.len(),
                "index misaligned before append, rebuilding vectors from chunks"
            );
            state.engine = self.rebuild(&state.chunks)?;
        }
        let added = metas.len();
        state.engine.append(vectors)?;
        state.chunks.extend(metas);
        self.publish(state);
        info!(added, total = state.chunks.len(), "chunks indexed");
        Ok(state.chunks.len())
    }

    fn check_widths(&self, vectors: &[Vec<f32>]) -> Result<()> {
        match vectors.iter().find(|v| v.len() != self.dim) {
            Some(v) => Err(Error::DimensionMismatch { expected: self.dim, actual: v.len() }),
            None => Ok(()),
        }
    }

    fn publish(&self, state: &IndexState) {
        self.indexed.store(state.chunks.len(), Ordering::Release);
    }

    // Mutations validate before touching state, so a poisoned lock still
    // guards an aligned aggregate.
    fn lock(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

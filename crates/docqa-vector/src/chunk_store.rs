//! Ordered chunk metadata, positionally aligned with the vector engine.

use std::collections::HashSet;

use docqa_core::{Chunk, DocumentSummary, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkStore {
    chunks: Vec<Chunk>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_chunks(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Chunk> {
        self.chunks.get(position)
    }

    pub fn as_slice(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn extend(&mut self, chunks: impl IntoIterator<Item = Chunk>) {
        self.chunks.extend(chunks);
    }

    /// Positions whose chunk came from `source`, ascending.
    pub fn positions_of(&self, source: &str) -> Vec<usize> {
        self.chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.source == source)
            .map(|(i, _)| i)
            .collect()
    }

    /// Everything except `positions`, relative order kept.
    pub fn without_positions(&self, positions: &[usize]) -> ChunkStore {
        let doomed: HashSet<usize> = positions.iter().copied().collect();
        let chunks = self
            .chunks
            .iter()
            .enumerate()
            .filter(|(i, _)| !doomed.contains(i))
            .map(|(_, c)| c.clone())
            .collect();
        Self { chunks }
    }

    /// Chunk counts per source, in order of first appearance.
    pub fn documents(&self) -> Vec<DocumentSummary> {
        let mut docs: Vec<DocumentSummary> = Vec::new();
        for chunk in &self.chunks {
            match docs.iter_mut().find(|d| d.name == chunk.source) {
                Some(doc) => doc.chunks += 1,
                None => docs.push(DocumentSummary { name: chunk.source.clone(), chunks: 1 }),
            }
        }
        docs
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.chunks)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(Self { chunks: serde_json::from_str(raw)? })
    }
}

//! Exact nearest-neighbour engines over squared Euclidean distance.
//!
//! An engine stores `dim`-wide vectors at ordinal positions `0..count`.
//! Appends take the next positions; positions are only ever renumbered by
//! [`VectorEngine::remove`] on engines that support it, or by replacing the
//! engine wholesale.

use std::collections::HashSet;

use docqa_core::config::EngineKind;
use docqa_core::{Error, Result};

use crate::codec;

/// One search hit: ordinal position and squared L2 distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

pub trait VectorEngine: Send {
    fn dim(&self) -> usize;
    fn count(&self) -> usize;

    /// All-or-nothing: a width mismatch anywhere in `vectors` appends nothing.
    fn append(&mut self, vectors: &[Vec<f32>]) -> Result<()>;

    /// Up to `min(k, count)` positions by ascending distance, ties broken by
    /// lower position.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;

    fn supports_removal(&self) -> bool {
        false
    }

    /// Drops the given positions and renumbers the survivors densely, keeping
    /// their relative order.
    fn remove(&mut self, _positions: &[usize]) -> Result<()> {
        Err(Error::RemovalUnsupported)
    }

    fn serialize(&self) -> Vec<u8>;
}

/// Append-only brute-force index; the moral equivalent of a flat L2 index
/// with no id mapping.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dim: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dim: usize) -> Self {
        Self { dim, data: Vec::new() }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let (dim, data) = codec::decode_vectors(bytes)?;
        Ok(Self { dim, data })
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dim)?;
        self.data.get(start..start + self.dim)
    }

    fn check_width(&self, v: &[f32]) -> Result<()> {
        if v.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: v.len() });
        }
        Ok(())
    }
}

impl VectorEngine for FlatIndex {
    fn dim(&self) -> usize {
        self.dim
    }

    fn count(&self) -> usize {
        self.data.len() / self.dim.max(1)
    }

    fn append(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        for v in vectors {
            self.check_width(v)?;
        }
        self.data.reserve(vectors.len() * self.dim);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.check_width(query)?;
        let k = k.min(self.count());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(position, row)| Neighbor { position, distance: squared_l2(query, row) })
            .collect();

        let order = |a: &Neighbor, b: &Neighbor| {
            a.distance.total_cmp(&b.distance).then(a.position.cmp(&b.position))
        };
        if k < hits.len() {
            hits.select_nth_unstable_by(k - 1, order);
            hits.truncate(k);
        }
        hits.sort_by(order);
        Ok(hits)
    }

    fn serialize(&self) -> Vec<u8> {
        codec::encode_vectors(self.dim, &self.data)
    }
}

/// Flat index that can drop positions in place.
#[derive(Debug, Clone)]
pub struct CompactingFlatIndex {
    inner: FlatIndex,
}

impl CompactingFlatIndex {
    pub fn new(dim: usize) -> Self {
        Self { inner: FlatIndex::new(dim) }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(Self { inner: FlatIndex::deserialize(bytes)? })
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        self.inner.vector(position)
    }
}

impl VectorEngine for CompactingFlatIndex {
    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn count(&self) -> usize {
        self.inner.count()
    }

    fn append(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        self.inner.append(vectors)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.inner.search(query, k)
    }

    fn supports_removal(&self) -> bool {
        true
    }

    fn remove(&mut self, positions: &[usize]) -> Result<()> {
        if positions.is_empty() {
            return Ok(());
        }
        let count = self.count();
        if let Some(bad) = positions.iter().find(|&&p| p >= count) {
            return Err(Error::InvalidArgument(format!("position {bad} out of range ({count} vectors)")));
        }
        let doomed: HashSet<usize> = positions.iter().copied().collect();
        let dim = self.inner.dim;
        let kept: Vec<f32> = self
            .inner
            .data
            .chunks_exact(dim)
            .enumerate()
            .filter(|(i, _)| !doomed.contains(i))
            .flat_map(|(_, row)| row.iter().copied())
            .collect();
        self.inner.data = kept;
        Ok(())
    }

    fn serialize(&self) -> Vec<u8> {
        self.inner.serialize()
    }
}

pub fn create_engine(kind: EngineKind, dim: usize) -> Box<dyn VectorEngine> {
    match kind {
        EngineKind::Flat => Box::new(FlatIndex::new(dim)),
        EngineKind::Compacting => Box::new(CompactingFlatIndex::new(dim)),
    }
}

/// Decodes a vector file into an engine of `kind`, insisting on `dim`.
pub fn decode_engine(kind: EngineKind, dim: usize, bytes: &[u8]) -> Result<Box<dyn VectorEngine>> {
    let engine: Box<dyn VectorEngine> = match kind {
        EngineKind::Flat => Box::new(FlatIndex::deserialize(bytes)?),
        EngineKind::Compacting => Box::new(CompactingFlatIndex::deserialize(bytes)?),
    };
    if engine.dim() != dim {
        return Err(Error::PersistenceCorruption(format!(
            "vector file has dimension {}, index expects {dim}",
            engine.dim()
        )));
    }
    Ok(engine)
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

//! Vector index lifecycle: chunk metadata and embedding vectors kept
//! positionally aligned across insert, delete, save and load.

pub mod chunk_store;
pub mod codec;
pub mod engine;
pub mod manager;
pub mod persist;

pub use chunk_store::ChunkStore;
pub use engine::{create_engine, decode_engine, CompactingFlatIndex, FlatIndex, Neighbor, VectorEngine};
pub use manager::{IndexManager, IndexStats, LoadOutcome, LoadReport, ScoredChunk};

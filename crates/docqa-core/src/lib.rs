pub mod config;
pub mod error;
pub mod splitter;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{Embedder, LanguageModel};
pub use types::{Chunk, DocumentSummary};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// An embedding's width differs from the index dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("length mismatch: {vectors} vectors for {chunks} chunks")]
    LengthMismatch { vectors: usize, chunks: usize },

    /// Re-embedding survivors failed; the previous index is untouched.
    #[error("index rebuild failed: {0}")]
    RebuildFailure(String),

    #[error("persisted index is corrupt: {0}")]
    PersistenceCorruption(String),

    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("language model call failed: {0}")]
    LanguageModel(String),

    #[error("vector engine does not support point removal")]
    RemovalUnsupported,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("text extraction failed: {0}")]
    Extraction(String),

    #[error("no text could be extracted from {0}")]
    EmptyDocument(String),

    #[error("unknown processing option: {0}")]
    UnknownOption(String),

    /// A detached cleanup task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Background(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

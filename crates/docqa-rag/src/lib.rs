//! Retrieval-augmented question answering over an [`docqa_vector::IndexManager`].

pub mod llm;
pub mod loader;
pub mod prompt;
pub mod workspace;

pub use llm::GeminiClient;
pub use prompt::{build_option_prompt, build_prompt, PostProcessOption};
pub use workspace::{
    sanitize_name, AskOutcome, DeleteTicket, IngestReport, ProcessOutcome, ProcessResult, RagAnswer, Workspace,
};

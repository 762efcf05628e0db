use async_trait::async_trait;

use crate::error::{Error, Result};

/// Text to vector. Every vector returned has exactly `dim()` entries.
///
/// Calls may block on model inference; async callers should go through
/// `spawn_blocking`.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| Error::ProviderUnavailable("empty embedding result".to_string()))
    }
}

/// Prompt in, answer out.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, prompt: &str) -> Result<String>;
}

use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};
use twox_hash::XxHash64;

use docqa_core::config::{EmbeddingBackend, EmbeddingSettings};
use docqa_core::{Embedder, Error, Result};

pub mod device;
pub mod pool;
pub mod tokenize;

pub use pool::masked_mean_l2;
pub use tokenize::tokenize_batch;

pub(crate) fn model_err(e: impl Display) -> Error {
    Error::ProviderUnavailable(e.to_string())
}

/// Sentence embedder over an XLM-RoBERTa checkpoint (BGE-M3 by default),
/// mean-pooled and L2-normalized.
pub struct SentenceModel {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
    max_len: usize,
    batch_size: usize,
}

impl SentenceModel {
    /// Loads `tokenizer.json`, `config.json` and `pytorch_model.bin` from
    /// `settings.model_dir`.
    pub fn load(settings: &EmbeddingSettings) -> Result<Self> {
        let device = device::select_device();
        let model_dir = settings.model_dir.as_path();
        if !model_dir.exists() {
            return Err(Error::ProviderUnavailable(format!(
                "model directory {} does not exist",
                model_dir.display()
            )));
        }
        info!(model_dir = %model_dir.display(), "loading sentence model");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            Error::ProviderUnavailable(format!(
                "Failed to load tokenizer from {}: {}",
                tokenizer_path.display(),
                e
            ))
        })?;
        let config = read_model_config(&model_dir.join("config.json"))?;

        let weights = candle_core::pickle::read_all(model_dir.join("pytorch_model.bin")).map_err(model_err)?;
        let weights_map: std::collections::HashMap<String, candle_core::Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights_map, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb).map_err(model_err)?;

        let mut loaded = Self {
            model,
            tokenizer,
            device,
            dim: 0,
            max_len: settings.max_len,
            batch_size: settings.batch_size,
        };
        loaded.dim = loaded
            .forward_batch(&["dimension probe".to_string()])?
            .first()
            .map(Vec::len)
            .ok_or_else(|| Error::ProviderUnavailable("model produced no output".into()))?;
        info!(dim = loaded.dim, "sentence model ready");
        Ok(loaded)
    }

    fn forward_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let (input_ids, attention_mask) =
            tokenize::tokenize_batch(&self.tokenizer, texts, self.max_len, &self.device)?;
        let token_type_ids = input_ids.zeros_like().map_err(model_err)?;
        let hidden = self
            .model
            .forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)
            .map_err(model_err)?;
        let pooled = pool::masked_mean_l2(&hidden, &attention_mask).map_err(model_err)?;
        pooled.to_device(&Device::Cpu).and_then(|t| t.to_vec2::<f32>()).map_err(model_err)
    }
}

fn read_model_config(path: &Path) -> Result<XLMRobertaConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::ProviderUnavailable(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&raw).map_err(|e| Error::ProviderUnavailable(format!("{}: {}", path.display(), e)))
}

impl Embedder for SentenceModel {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            out.extend(self.forward_batch(batch)?);
        }
        let elapsed = start.elapsed();
        debug!(texts = texts.len(), ms = elapsed.as_millis() as u64, "embedded batch");
        if !texts.is_empty() && elapsed.as_millis() > 100 * texts.len() as u128 {
            warn!(texts = texts.len(), ms = elapsed.as_millis() as u64, "slow embedding");
        }
        Ok(out)
    }
}

/// Deterministic bag-of-tokens embedding: each whitespace token is hashed into
/// a bucket, the vector is L2-normalized. Identical text always produces an
/// identical vector, which is all tests and offline runs need.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for (i, token) in text.split_whitespace().enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

impl Embedder for HashEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Picks the provider named by `settings.backend`; `APP_USE_FAKE_EMBEDDINGS=1`
/// forces the hash embedder regardless.
pub fn embedder_from_settings(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    let use_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if use_fake || settings.backend == EmbeddingBackend::Hash {
        info!(dim = settings.dim, "using hash embedder");
        return Ok(Arc::new(HashEmbedder::new(settings.dim)));
    }
    Ok(Arc::new(SentenceModel::load(settings)?))
}

//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge compiled-in defaults, `config.toml`,
//! `config.<env>.toml` and `APP_*` env vars (nested keys separated by `__`,
//! e.g. `APP_INDEX__ENGINE=compacting`). Provides helpers to expand `~` and
//! `${VAR}` and to resolve relative paths against a known base directory.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_for_env(&env_name)
    }

    pub fn load_for_env(env_name: &str) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("config.toml"));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        Ok(Self { figment })
    }

    /// Wraps an already assembled figment; tests use this to avoid touching
    /// the working directory.
    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{}': {}", key, e)))
    }

    /// Extracts, validates and path-resolves the typed settings. Relative
    /// paths are resolved against `base`.
    pub fn settings_relative_to(&self, base: &Path) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings.resolve_paths(base))
    }

    pub fn settings(&self) -> Result<Settings> {
        let cwd = env::current_dir()?;
        self.settings_relative_to(&cwd)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub index: IndexSettings,
    pub embedding: EmbeddingSettings,
    pub splitter: SplitterSettings,
    pub retrieval: RetrievalSettings,
    pub llm: LlmSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    /// Uploaded documents are copied here; deleting a document removes its file.
    pub raw_dir: PathBuf,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self { raw_dir: PathBuf::from("data/raw") }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Append-only; deletes go through a full re-embedding rebuild.
    #[default]
    Flat,
    /// Supports native point removal.
    Compacting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub vector_path: PathBuf,
    pub meta_path: PathBuf,
    pub engine: EngineKind,
    pub rebuild_batch_size: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            vector_path: PathBuf::from("data/index/vectors.bin"),
            meta_path: PathBuf::from("data/index/chunks_meta.json"),
            engine: EngineKind::Flat,
            rebuild_batch_size: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    Model,
    Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    pub model_dir: PathBuf,
    /// Dimension of the hash backend; the model backend reports its own.
    pub dim: usize,
    pub max_len: usize,
    pub batch_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Model,
            model_dir: PathBuf::from("models/bge-m3"),
            dim: 384,
            max_len: 256,
            batch_size: 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitterSettings {
    pub chunk_size: usize,
    pub overlap: usize,
    /// Windows with this many characters or fewer are discarded.
    pub min_chars: usize,
}

impl Default for SplitterSettings {
    fn default() -> Self {
        Self { chunk_size: 500, overlap: 50, min_chars: 20 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub default_k: usize,
    /// `process` pulls `k * process_fanout` candidates before filtering by file.
    pub process_fanout: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { default_k: 5, process_fanout: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub model: String,
    pub temperature: f32,
    pub api_key_env: String,
    pub endpoint: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            temperature: 0.0,
            api_key_env: "GEMINI_API_KEY".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.index.rebuild_batch_size == 0 {
            return Err(Error::InvalidConfig("index.rebuild_batch_size must be >= 1".into()));
        }
        if self.embedding.dim == 0 {
            return Err(Error::InvalidConfig("embedding.dim must be >= 1".into()));
        }
        if self.embedding.batch_size == 0 || self.embedding.max_len == 0 {
            return Err(Error::InvalidConfig(
                "embedding.batch_size and embedding.max_len must be >= 1".into(),
            ));
        }
        if self.splitter.chunk_size == 0 || self.splitter.overlap >= self.splitter.chunk_size {
            return Err(Error::InvalidConfig(format!(
                "splitter.overlap ({}) must be smaller than splitter.chunk_size ({})",
                self.splitter.overlap, self.splitter.chunk_size
            )));
        }
        if self.retrieval.default_k == 0 || self.retrieval.process_fanout == 0 {
            return Err(Error::InvalidConfig(
                "retrieval.default_k and retrieval.process_fanout must be >= 1".into(),
            ));
        }
        Ok(())
    }

    /// Expands `~`/`${VAR}` in every configured path and anchors relative
    /// ones at `base`.
    #[must_use]
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        let resolve = |p: &Path| resolve_with_base(base, p.to_string_lossy());
        self.data.raw_dir = resolve(&self.data.raw_dir);
        self.index.vector_path = resolve(&self.index.vector_path);
        self.index.meta_path = resolve(&self.index.meta_path);
        self.embedding.model_dir = resolve(&self.embedding.model_dir);
        self
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    // Expand env vars first
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}

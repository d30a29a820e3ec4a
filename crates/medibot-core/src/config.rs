//! Persisted config (chunking, embedding, index) plus credentials from the environment.
//!
//! Values come from `config.toml` (the app data directory by default, or an explicit
//! path), then `MEDIBOT_*` environment overrides. Secrets never live in the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app_data;
use crate::chunks::{
    default_separators, markdown_separators, ChunkConfigError, Separator, SplitterConfig,
    DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE,
};
use crate::embed::{DEFAULT_BASE_URL, DEFAULT_EMBED_DIMENSION, DEFAULT_EMBED_MODEL};
use crate::pages::DEFAULT_MAX_FILE_SIZE;
use crate::pinecone::DEFAULT_CONTROL_URL;
use crate::retry::RetryPolicy;
use crate::store::{IndexSpec, Metric};

const CONFIG_FILENAME: &str = "config.toml";

pub const PINECONE_API_KEY: &str = "PINECONE_API_KEY";
const ENV_INDEX_NAME: &str = "MEDIBOT_INDEX_NAME";
const ENV_EMBED_URL: &str = "MEDIBOT_EMBED_URL";
const ENV_EMBED_MODEL: &str = "MEDIBOT_EMBED_MODEL";
const ENV_CHUNK_SIZE: &str = "MEDIBOT_CHUNK_SIZE";
const ENV_CHUNK_OVERLAP: &str = "MEDIBOT_CHUNK_OVERLAP";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub retry: RetryConfig,
    pub loader: LoaderConfig,
}

/// Which built-in separator list to split with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeparatorPreset {
    #[default]
    Prose,
    Markdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub preset: SeparatorPreset,
    /// Custom separators, coarsest first; replaces the preset. `""` means a hard cut.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separators: Option<Vec<String>>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            preset: SeparatorPreset::Prose,
            separators: None,
        }
    }
}

impl ChunkingConfig {
    pub fn splitter_config(&self) -> SplitterConfig {
        let separators = match (&self.separators, self.preset) {
            (Some(custom), _) => custom.iter().map(|s| Separator::from(s.as_str())).collect(),
            (None, SeparatorPreset::Prose) => default_separators(),
            (None, SeparatorPreset::Markdown) => markdown_separators(),
        };
        SplitterConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            separators,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Ollama server URL.
    pub base_url: String,
    pub model: String,
    /// Vector length the model produces; also the index dimension.
    pub dimension: usize,
    /// Texts per embedding request.
    pub batch_size: usize,
    /// Embedding requests in flight at once.
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_EMBED_MODEL.to_string(),
            dimension: DEFAULT_EMBED_DIMENSION,
            batch_size: 32,
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub name: String,
    pub metric: Metric,
    pub cloud: String,
    pub region: String,
    /// Namespace within the index; empty for the default namespace.
    pub namespace: String,
    /// Records per upsert request.
    pub upsert_batch_size: usize,
    pub ready_timeout_secs: u64,
    pub control_url: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: "medi-bot".to_string(),
            metric: Metric::Cosine,
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
            namespace: String::new(),
            upsert_batch_size: 100,
            ready_timeout_secs: 120,
            control_url: DEFAULT_CONTROL_URL.to_string(),
        }
    }
}

impl IndexConfig {
    pub fn spec(&self, dimension: usize) -> IndexSpec {
        IndexSpec {
            name: self.name.clone(),
            dimension,
            metric: self.metric,
            cloud: self.cloud.clone(),
            region: self.region.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Largest file the loaders will read, in bytes.
    pub max_file_size: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl Config {
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Parse)
    }

    /// Applies `MEDIBOT_*` overrides. `lookup` maps a variable name to its value.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup(ENV_INDEX_NAME) {
            self.index.name = v;
        }
        if let Some(v) = lookup(ENV_EMBED_URL) {
            self.embedding.base_url = v;
        }
        if let Some(v) = lookup(ENV_EMBED_MODEL) {
            self.embedding.model = v;
        }
        if let Some(v) = lookup(ENV_CHUNK_SIZE) {
            self.chunking.chunk_size = parse_override(ENV_CHUNK_SIZE, &v)?;
        }
        if let Some(v) = lookup(ENV_CHUNK_OVERLAP) {
            self.chunking.chunk_overlap = parse_override(ENV_CHUNK_OVERLAP, &v)?;
        }
        Ok(())
    }

    /// Rejects configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking.splitter_config().validate()?;
        let positive = [
            ("embedding.dimension", self.embedding.dimension),
            ("embedding.batch_size", self.embedding.batch_size),
            ("embedding.concurrency", self.embedding.concurrency),
            ("index.upsert_batch_size", self.index.upsert_batch_size),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be positive")));
        }
        if self.index.name.trim().is_empty() {
            return Err(ConfigError::Invalid("index.name must not be empty".into()));
        }
        Ok(())
    }
}

fn parse_override(name: &'static str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidOverride {
            name,
            value: value.to_string(),
        })
}

/// Where the config file lives when no explicit path is given.
pub fn default_config_path() -> Option<PathBuf> {
    app_data::app_data_file(CONFIG_FILENAME)
}

/// Load config from `path`, or from the app data directory when `path` is `None`.
/// A missing default file gives the defaults; a missing explicit file is an error.
/// Environment overrides are applied and the result validated.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let s = std::fs::read_to_string(p).map_err(|e| ConfigError::Read(p.to_path_buf(), e))?;
            Config::from_toml(&s)?
        }
        None => match default_config_path() {
            Some(p) if p.is_file() => {
                let s = std::fs::read_to_string(&p).map_err(|e| ConfigError::Read(p.clone(), e))?;
                Config::from_toml(&s)?
            }
            _ => Config::default(),
        },
    };
    config.apply_overrides(|k| std::env::var(k).ok())?;
    config.validate()?;
    Ok(config)
}

/// Save config to `path`, or to the app data directory. Returns where it was written.
pub fn save_config(config: &Config, path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path().ok_or(ConfigError::NoDataDir)?,
    };
    let s = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    std::fs::write(&path, s).map_err(ConfigError::Write)?;
    Ok(path)
}

/// Secrets read once at startup.
#[derive(Clone)]
pub struct Credentials {
    pub pinecone_api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("pinecone_api_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// An unset or blank variable counts as missing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let pinecone_api_key = lookup(PINECONE_API_KEY)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(PINECONE_API_KEY))?;
        Ok(Self { pinecone_api_key })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("failed to read config {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("invalid config: {0}")]
    Parse(toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
    #[error("{name}={value:?} is not a valid number")]
    InvalidOverride { name: &'static str, value: String },
    #[error("invalid chunking config: {0}")]
    Chunking(#[from] ChunkConfigError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

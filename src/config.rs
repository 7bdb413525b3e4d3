//! TOML configuration parsing and validation.
//!
//! Endpoints, collection names, and tuning knobs live in the config file;
//! credentials (`AWS_ACCESS_KEY_ID`, `OPENAI_API_KEY`, …) are only ever
//! read from the environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chunk::ChunkParams;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Where the bill PDFs live. Exactly one backend may be configured.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    pub s3: Option<S3SourceConfig>,
    pub filesystem: Option<FsSourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3SourceConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FsSourceConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

/// Vector-store connection settings.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_host")]
    pub host: String,
    #[serde(default = "default_index_port")]
    pub port: u16,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl IndexConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            host: default_index_host(),
            port: default_index_port(),
            collection: default_collection(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `ollama`, `openai`, or `hash` (deterministic offline vectors).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Base URL for the embedding endpoint (Ollama only).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Chat-model endpoint (OpenAI-compatible `chat/completions`).
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_url")]
    pub url: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_model_max_retries")]
    pub max_retries: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            url: default_model_url(),
            model: default_chat_model(),
            timeout_secs: default_model_timeout_secs(),
            max_retries: default_model_max_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Hits scoring below this are dropped from tool results.
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.pdf".to_string()]
}
fn default_index_host() -> String {
    "localhost".to_string()
}
fn default_index_port() -> u16 {
    6333
}
fn default_collection() -> String {
    "bill_chunks".to_string()
}
fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}
fn default_embedding_provider() -> String {
    "ollama".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_model_url() -> String {
    "http://localhost:11434/v1".to_string()
}
fn default_chat_model() -> String {
    "llama3.1".to_string()
}
fn default_model_timeout_secs() -> u64 {
    120
}
fn default_model_max_retries() -> u32 {
    2
}
fn default_top_k() -> usize {
    5
}
fn default_min_score() -> f32 {
    0.35
}
fn default_max_tool_rounds() -> usize {
    3
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        // Rejects zero sizes and overlap >= chunk_size up front, before any
        // document is touched.
        ChunkParams::new(self.chunking.chunk_size, self.chunking.overlap)?;

        if self.storage.s3.is_some() && self.storage.filesystem.is_some() {
            return Err(Error::Config(
                "configure either [storage.s3] or [storage.filesystem], not both".to_string(),
            ));
        }

        if self.embedding.dims == 0 {
            return Err(Error::Config("embedding.dims must be > 0".to_string()));
        }
        match self.embedding.provider.as_str() {
            "ollama" | "openai" | "hash" => {}
            other => {
                return Err(Error::Config(format!(
                    "unknown embedding provider: '{}'. Must be ollama, openai, or hash.",
                    other
                )))
            }
        }

        if self.agent.top_k == 0 {
            return Err(Error::Config("agent.top_k must be >= 1".to_string()));
        }
        if self.agent.max_tool_rounds == 0 {
            return Err(Error::Config(
                "agent.max_tool_rounds must be >= 1".to_string(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.agent.min_score) {
            return Err(Error::Config(
                "agent.min_score must be in [-1.0, 1.0]".to_string(),
            ));
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))?;

    config.validate()?;
    Ok(config)
}

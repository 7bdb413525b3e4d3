//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete providers:
//! - **[`OllamaEmbedder`]** — calls a local Ollama instance's `/api/embed`
//!   endpoint (default model `nomic-embed-text`, 768 dims).
//! - **[`OpenAiEmbedder`]** — calls the OpenAI embeddings API.
//! - **[`HashEmbedder`]** — deterministic offline vectors for tests and
//!   smoke runs; no network.
//!
//! The embedding model is asymmetric: documents and queries carry different
//! input prefixes ([`EmbedMode`]). Providers prepend the prefix before
//! calling the model, so callers only state which side of the contract a
//! text sits on.
//!
//! # Retry Strategy
//!
//! HTTP 429 and 5xx responses and network errors are retried with
//! exponential backoff (1s, 2s, 4s, … capped at 32s); other 4xx responses
//! fail immediately. A batch either embeds completely or not at all, so a
//! failed call can be retried without partial writes.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Which side of the retrieval contract a text sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    Document,
    Query,
}

impl EmbedMode {
    /// Input prefix the embedding model expects (nomic convention).
    pub fn prefix(self) -> &'static str {
        match self {
            EmbedMode::Document => "search_document: ",
            EmbedMode::Query => "search_query: ",
        }
    }
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    /// Vector dimensionality every returned embedding must have.
    fn dims(&self) -> usize;

    /// Embed a batch of texts. Order-preserving: one vector per input, in
    /// input order. Fails on an empty batch, on a dimension mismatch, or
    /// when the underlying call fails; always as a whole.
    async fn embed(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Vec<f32>>>;
}

/// Instantiate the provider named in the configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "ollama" => Ok(Box::new(OllamaEmbedder::new(config))),
        "openai" => Ok(Box::new(OpenAiEmbedder::new(config)?)),
        "hash" => Ok(Box::new(HashEmbedder::new(config.dims))),
        other => Err(Error::Config(format!(
            "unknown embedding provider: '{}'. Must be ollama, openai, or hash.",
            other
        ))),
    }
}

fn check_batch(texts: &[String]) -> Result<()> {
    if texts.is_empty() {
        return Err(Error::Embedding("empty input batch".to_string()));
    }
    Ok(())
}

fn prefixed(texts: &[String], mode: EmbedMode) -> Vec<String> {
    texts
        .iter()
        .map(|t| format!("{}{}", mode.prefix(), t))
        .collect()
}

fn check_dims(vectors: &[Vec<f32>], expected: usize, dims: usize) -> Result<()> {
    if vectors.len() != expected {
        return Err(Error::Embedding(format!(
            "expected {} vectors, got {}",
            expected,
            vectors.len()
        )));
    }
    for v in vectors {
        if v.len() != dims {
            return Err(Error::Embedding(format!(
                "expected {}-dim vectors, got {}",
                dims,
                v.len()
            )));
        }
    }
    Ok(())
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt - 1).min(5))
}

// ============ Ollama provider ============

pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    timeout: Duration,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            model: config.model.clone(),
            dims: config.dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        check_batch(texts)?;

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::ServiceUnavailable(e.to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": prefixed(texts, mode),
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff(attempt)).await;
            }

            let resp = client
                .post(format!("{}/api/embed", self.url))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| Error::Embedding(e.to_string()))?;
                        let vectors = parse_ollama_response(&json)?;
                        check_dims(&vectors, texts.len(), self.dims)?;
                        return Ok(vectors);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(Error::Embedding(format!(
                            "Ollama API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    return Err(Error::Embedding(format!(
                        "Ollama API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(Error::ServiceUnavailable(format!(
                        "Ollama connection error (is Ollama running at {}?): {}",
                        self.url, e
                    )));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            Error::ServiceUnavailable("embedding failed after retries".to_string())
        }))
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| Error::Embedding("invalid Ollama response: missing embeddings".into()))?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| Error::Embedding("invalid Ollama response: embedding not an array".into()))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

// ============ OpenAI provider ============

pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    timeout: Duration,
    max_retries: u32,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY environment variable not set".into()))?;

        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            api_key,
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        check_batch(texts)?;

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::ServiceUnavailable(e.to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": prefixed(texts, mode),
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff(attempt)).await;
            }

            let resp = client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| Error::Embedding(e.to_string()))?;
                        let vectors = parse_openai_response(&json)?;
                        check_dims(&vectors, texts.len(), self.dims)?;
                        return Ok(vectors);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(Error::Embedding(format!(
                            "OpenAI API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    return Err(Error::Embedding(format!(
                        "OpenAI API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(Error::ServiceUnavailable(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            Error::ServiceUnavailable("embedding failed after retries".to_string())
        }))
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::Embedding("invalid OpenAI response: missing data array".into()))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| Error::Embedding("invalid OpenAI response: missing embedding".into()))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }

    Ok(embeddings)
}

// ============ Hash provider ============

/// Deterministic offline embedder: hashes whitespace tokens into a
/// fixed-dimension bag-of-words vector, L2-normalized. Identical text
/// always maps to the identical vector and token overlap shows up as
/// cosine similarity, which is exactly what pipeline tests and offline
/// smoke runs need. The mode prefix is ignored; there is no asymmetric
/// model behind it.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in text.split_whitespace() {
            let mut hasher = Sha256::new();
            hasher.update(token.to_lowercase().as_bytes());
            let digest = hasher.finalize();
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bytes) % self.dims as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String], _mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        check_batch(texts)?;
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

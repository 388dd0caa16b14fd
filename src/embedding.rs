//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`OpenAIProvider`]**: calls `POST {base_url}/embeddings` on OpenAI or any
//!   OpenAI-compatible endpoint, with batching, timeout, retry, and backoff.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//!
//! Also provides vector utilities used by the stores:
//! - [`cosine_similarity`] / [`cosine_distance`]
//! - [`vec_to_blob`] / [`blob_to_vec`] for SQLite BLOB storage
//!
//! There is no caching: every call re-embeds.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{resolve_api_key, EmbeddingConfig, ProviderKind};
use crate::error::{ProviderErrorKind, RagError, Result};
use crate::http;

/// Converts text into fixed-length vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Embed a batch of texts, returning one vector per input in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            RagError::provider(
                self.model_name(),
                ProviderErrorKind::Malformed,
                "empty embedding response",
            )
        })
    }
}

/// Create the provider selected by `config.provider`.
///
/// # Errors
///
/// [`RagError::Config`] when the OpenAI provider has no API key in the
/// environment or the HTTP client cannot be built.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider {
        ProviderKind::OpenAi => Ok(Arc::new(OpenAIProvider::new(config)?)),
        ProviderKind::Ollama => Ok(Arc::new(OllamaProvider::new(config)?)),
    }
}

// ============ OpenAI Provider ============

/// Embedding provider for the OpenAI embeddings API.
pub struct OpenAIProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    batch_size: usize,
    max_retries: u32,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = resolve_api_key(&config.api_key_env)?;
        Ok(Self {
            client: http::build_client(config.timeout_secs)?,
            url: format!("{}/embeddings", config.base_url()),
            api_key,
            model: config.model.clone(),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            debug!(provider = "openai", batch_size = batch.len(), "embedding batch");
            let body = json!({ "model": self.model, "input": batch });
            let json = http::post_json(
                &self.client,
                "openai",
                &self.url,
                Some(&self.api_key),
                &body,
                self.max_retries,
            )
            .await?;
            let vectors = parse_openai_response(&json)?;
            check_count("openai", batch.len(), vectors.len())?;
            out.extend(vectors);
        }

        Ok(out)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index` when present.
pub fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| malformed("openai", "missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| malformed("openai", "missing embedding"))?;
        indexed.push((index, parse_vector("openai", embedding)?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider for a local Ollama daemon (`POST /api/embed`).
pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    batch_size: usize,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: http::build_client(config.timeout_secs)?,
            url: format!("{}/api/embed", config.base_url()),
            model: config.model.clone(),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            debug!(provider = "ollama", batch_size = batch.len(), "embedding batch");
            let body = json!({ "model": self.model, "input": batch });
            let json = http::post_json(
                &self.client,
                "ollama",
                &self.url,
                None,
                &body,
                self.max_retries,
            )
            .await?;
            let vectors = parse_ollama_response(&json)?;
            check_count("ollama", batch.len(), vectors.len())?;
            out.extend(vectors);
        }

        Ok(out)
    }
}

pub fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| malformed("ollama", "missing embeddings array"))?
        .iter()
        .map(|e| parse_vector("ollama", e))
        .collect()
}

fn parse_vector(provider: &str, value: &Value) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| malformed(provider, "embedding is not an array"))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| malformed(provider, "embedding contains a non-number"))
        })
        .collect()
}

fn check_count(provider: &str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(malformed(
            provider,
            &format!("expected {} embeddings, got {}", expected, got),
        ));
    }
    Ok(())
}

fn malformed(provider: &str, message: &str) -> RagError {
    RagError::provider(
        provider,
        ProviderErrorKind::Malformed,
        format!("invalid response: {}", message),
    )
}

// ============ Vector utilities ============

/// Encode a float vector as little-endian `f32` bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Reverse of [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, zero vectors, or vectors of different lengths.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// `1 - cosine_similarity`, so smaller is closer.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

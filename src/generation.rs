//! Answer generation via hosted chat models.
//!
//! [`AnswerGenerator`] turns a fully rendered prompt into answer text.
//! Two backends are provided:
//! - [`OpenAIChatGenerator`]: `POST {base_url}/chat/completions`; works with
//!   OpenAI and OpenAI-compatible services such as DashScope's compatible mode.
//! - [`OllamaChatGenerator`]: `POST /api/chat` on a local Ollama daemon.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{resolve_api_key, GenerationConfig, ProviderKind};
use crate::error::{ProviderErrorKind, RagError, Result};
use crate::http;

/// Produces natural-language answers from a prompt.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Create the generator selected by `config.provider`.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn AnswerGenerator>> {
    match config.provider {
        ProviderKind::OpenAi => Ok(Arc::new(OpenAIChatGenerator::new(config)?)),
        ProviderKind::Ollama => Ok(Arc::new(OllamaChatGenerator::new(config)?)),
    }
}

pub struct OpenAIChatGenerator {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OpenAIChatGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = resolve_api_key(&config.api_key_env)?;
        Ok(Self {
            client: http::build_client(config.timeout_secs)?,
            url: format!("{}/chat/completions", config.base_url()),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OpenAIChatGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!(provider = "openai", model = %self.model, prompt_len = prompt.len(), "generating answer");
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let json = http::post_json(
            &self.client,
            "openai",
            &self.url,
            Some(&self.api_key),
            &body,
            self.max_retries,
        )
        .await?;
        parse_openai_chat(&json)
    }
}

/// Extract `choices[0].message.content`.
pub fn parse_openai_chat(json: &Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| {
            RagError::provider(
                "openai",
                ProviderErrorKind::Malformed,
                "invalid response: missing choices[0].message.content",
            )
        })
}

pub struct OllamaChatGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OllamaChatGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            client: http::build_client(config.timeout_secs)?,
            url: format!("{}/api/chat", config.base_url()),
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OllamaChatGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!(provider = "ollama", model = %self.model, prompt_len = prompt.len(), "generating answer");
        let body = json!({
            "model": self.model,
            "stream": false,
            "options": { "temperature": self.temperature },
            "messages": [{ "role": "user", "content": prompt }],
        });
        let json =
            http::post_json(&self.client, "ollama", &self.url, None, &body, self.max_retries)
                .await?;
        parse_ollama_chat(&json)
    }
}

/// Extract `message.content`.
pub fn parse_ollama_chat(json: &Value) -> Result<String> {
    json.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| {
            RagError::provider(
                "ollama",
                ProviderErrorKind::Malformed,
                "invalid response: missing message.content",
            )
        })
}

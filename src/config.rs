//! TOML configuration with defaults and environment overrides.
//!
//! Every section and key is optional; an absent file yields
//! [`Config::default`], which mirrors the layout the knowledge builder
//! has always used (`./knowledge_source` → `./chroma_db`, collection
//! `campus`, 500-character chunks with 50 characters of overlap).
//!
//! ```toml
//! [ingest]
//! source_dir = "./knowledge_source"
//! chunk_size = 500
//! chunk_overlap = 50
//!
//! [store]
//! persist_dir = "./chroma_db"
//! collection = "campus"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//!
//! [generation]
//! provider = "openai"
//! model = "gpt-3.5-turbo"
//!
//! [retrieval]
//! top_k = 3
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```
//!
//! Credentials never live in the file: providers read the environment
//! variable named by `api_key_env` (default `OPENAI_API_KEY`).

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{RagError, Result};

/// Overrides `[store].persist_dir`.
pub const ENV_PERSIST_DIR: &str = "CAMPUS_RAG_PERSIST_DIR";
/// Overrides `[server].bind`.
pub const ENV_BIND: &str = "CAMPUS_RAG_BIND";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub ingest: IngestConfig,
    pub store: StoreConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub retrieval: RetrievalConfig,
    pub server: ServerConfig,
    /// Replaces the built-in rule table when non-empty.
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    pub source_dir: PathBuf,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("./knowledge_source"),
            include_globs: vec!["**/*.txt".to_string()],
            exclude_globs: Vec::new(),
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub persist_dir: PathBuf,
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            persist_dir: PathBuf::from("./chroma_db"),
            collection: "campus".to_string(),
        }
    }
}

impl StoreConfig {
    /// Path of the SQLite file holding every collection.
    pub fn db_path(&self) -> PathBuf {
        self.persist_dir.join("vectors.sqlite")
    }
}

/// Which HTTP API a provider speaks.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI or any OpenAI-compatible endpoint (e.g. DashScope compatible mode).
    OpenAi,
    /// A local Ollama daemon.
    Ollama,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Ollama => "ollama",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Ollama => "http://localhost:11434",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key_env: String,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: "text-embedding-3-small".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            batch_size: 64,
            max_retries: 3,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub temperature: f32,
    pub base_url: Option<String>,
    pub api_key_env: String,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.0,
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_retries: 2,
            timeout_secs: 60,
        }
    }
}

impl GenerationConfig {
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 3 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Consult the rule table before running retrieval.
    pub rule_prefilter: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            rule_prefilter: false,
        }
    }
}

/// One entry of a user-supplied rule table.
#[derive(Debug, Deserialize, Clone)]
pub struct RuleConfig {
    pub category: String,
    pub keywords: Vec<String>,
    pub answer: String,
}

/// Read the API key from the environment variable `env_name`.
///
/// A missing or blank variable is a [`RagError::Config`].
pub fn resolve_api_key(env_name: &str) -> Result<String> {
    match std::env::var(env_name) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(RagError::Config(format!(
            "{} environment variable not set",
            env_name
        ))),
    }
}

impl Config {
    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_PERSIST_DIR).filter(|v| !v.trim().is_empty()) {
            self.store.persist_dir = PathBuf::from(dir);
        }
        if let Some(bind) = lookup(ENV_BIND).filter(|v| !v.trim().is_empty()) {
            self.server.bind = bind;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ingest.chunk_size == 0 {
            return Err(RagError::Config("ingest.chunk_size must be > 0".into()));
        }
        if self.ingest.chunk_overlap >= self.ingest.chunk_size {
            return Err(RagError::Config(format!(
                "ingest.chunk_overlap ({}) must be smaller than ingest.chunk_size ({})",
                self.ingest.chunk_overlap, self.ingest.chunk_size
            )));
        }
        if self.ingest.include_globs.is_empty() {
            return Err(RagError::Config(
                "ingest.include_globs must not be empty".into(),
            ));
        }
        if self.store.collection.trim().is_empty() {
            return Err(RagError::Config("store.collection must not be empty".into()));
        }
        if self.retrieval.top_k == 0 {
            return Err(RagError::Config("retrieval.top_k must be >= 1".into()));
        }
        if self.embedding.batch_size == 0 {
            return Err(RagError::Config("embedding.batch_size must be > 0".into()));
        }
        if self.embedding.model.trim().is_empty() {
            return Err(RagError::Config("embedding.model must be specified".into()));
        }
        if self.generation.model.trim().is_empty() {
            return Err(RagError::Config("generation.model must be specified".into()));
        }
        for rule in &self.rules {
            if rule.keywords.iter().all(|k| k.trim().is_empty()) {
                return Err(RagError::Config(format!(
                    "rule '{}' must have at least one keyword",
                    rule.category
                )));
            }
        }
        Ok(())
    }
}

/// Parse configuration from TOML text and validate it.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| RagError::Config(format!("failed to parse config: {}", e)))?;
    config.validate()?;
    Ok(config)
}

/// Load configuration.
///
/// With `None`, starts from [`Config::default`]. Environment overrides are
/// applied last and the result is validated.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|e| {
                RagError::Config(format!(
                    "failed to read config file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            toml::from_str(&content)
                .map_err(|e| RagError::Config(format!("failed to parse config file: {}", e)))?
        }
        None => Config::default(),
    };

    config.apply_overrides(|name| std::env::var(name).ok());
    config.validate()?;
    Ok(config)
}

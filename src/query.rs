//! Retrieval-augmented question answering.
//!
//! [`QueryService::ask`] runs embed → retrieve → generate:
//!
//! 1. Reject blank questions before any provider call.
//! 2. Embed the question and fetch the `top_k` nearest chunks.
//! 3. With no hits, answer [`REFUSAL_ANSWER`] with no sources.
//! 4. Otherwise render each hit as `来源: <source>\n<text>`, join them with
//!    [`CONTEXT_DELIMITER`] and fill [`PROMPT_TEMPLATE`].
//! 5. Return the generated text with one citation per hit, in retrieval order.
//!
//! Provider errors propagate unchanged; nothing is retried at this level.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::generation::{create_generator, AnswerGenerator};
use crate::lock;
use crate::models::{Answer, ScoredChunk, SourceCitation};
use crate::store::{CollectionInfo, SqliteStore, VectorStore};

/// Fixed answer when nothing relevant is retrieved.
pub const REFUSAL_ANSWER: &str = "根据现有信息，我无法回答这个问题";

pub const CONTEXT_DELIMITER: &str = "\n\n---\n\n";

/// Instruction sent to the generator. `{context}` and `{question}` are
/// substituted by [`build_prompt`].
pub const PROMPT_TEMPLATE: &str = "你是一个专业的校园信息助手。请严格根据以下提供的上下文信息来回答问题。如果上下文信息中没有答案，请直接说“根据现有信息，我无法回答这个问题”，不要编造答案。\n\n上下文：\n{context}\n\n问题：\n{question}\n\n请用中文回答：";

/// Render retrieved chunks as a single context block.
pub fn build_context(hits: &[ScoredChunk]) -> String {
    hits.iter()
        .map(|h| format!("来源: {}\n{}", h.chunk.source_path, h.chunk.text))
        .collect::<Vec<_>>()
        .join(CONTEXT_DELIMITER)
}

pub fn build_prompt(context: &str, question: &str) -> String {
    PROMPT_TEMPLATE
        .replace("{context}", context)
        .replace("{question}", question)
}

/// First `max_chars` characters of `text` with newlines flattened to
/// spaces, followed by `...` when truncated.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut out: String = flat.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

/// Check that `collection` holds a completed build.
///
/// # Errors
///
/// [`RagError::Config`] when the collection is missing or empty, or when
/// its last build never finished.
pub async fn check_collection(
    store: &dyn VectorStore,
    collection: &str,
) -> Result<CollectionInfo> {
    match store.info(collection).await? {
        Some(info) if info.is_complete() => Ok(info),
        Some(info) if info.chunk_count > 0 => Err(RagError::Config(format!(
            "collection '{}' has an unfinished build (run `campus-rag build` to rebuild it)",
            collection
        ))),
        _ => Err(RagError::Config(format!(
            "collection '{}' not found (run `campus-rag build` first)",
            collection
        ))),
    }
}

pub struct QueryService {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    generator: Arc<dyn AnswerGenerator>,
    collection: String,
    top_k: usize,
}

impl QueryService {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        generator: Arc<dyn AnswerGenerator>,
        collection: impl Into<String>,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            generator,
            collection: collection.into(),
            top_k: top_k.max(1),
        }
    }

    /// Construct the service against the persisted store.
    ///
    /// # Errors
    ///
    /// [`RagError::Config`] when a build is in progress, a provider
    /// credential is missing, or [`check_collection`] fails.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let persist_dir = &config.store.persist_dir;
        if lock::is_locked(persist_dir) {
            return Err(RagError::Config(format!(
                "a build is in progress in {} (remove {} if it crashed)",
                persist_dir.display(),
                lock::lock_path(persist_dir).display()
            )));
        }

        let embedder = create_provider(&config.embedding)?;
        let generator = create_generator(&config.generation)?;

        let store = SqliteStore::open_read_only(&config.store.db_path()).await?;
        let collection = &config.store.collection;
        let info = check_collection(&store, collection).await?;
        if let Some(model) = info.model.as_deref() {
            if model != embedder.model_name() {
                warn!(
                    collection = %collection,
                    built_with = model,
                    configured = embedder.model_name(),
                    "embedding model differs from the one used at build time"
                );
            }
        }
        info!(
            collection = %collection,
            chunk_count = info.chunk_count,
            dims = info.dims,
            "query service ready"
        );

        Ok(Self::new(
            embedder,
            Arc::new(store),
            generator,
            collection.clone(),
            config.retrieval.top_k,
        ))
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn ask(&self, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::Validation("question must not be empty".into()));
        }

        let vector = self.embedder.embed(question).await?;
        let hits = self.store.query(&self.collection, &vector, self.top_k).await?;
        debug!(collection = %self.collection, hits = hits.len(), "retrieved context");

        if hits.is_empty() {
            return Ok(Answer::uncited(REFUSAL_ANSWER));
        }

        let prompt = build_prompt(&build_context(&hits), question);
        let text = self.generator.generate(&prompt).await?;

        let cited_sources = hits
            .into_iter()
            .map(|h| SourceCitation {
                source_path: h.chunk.source_path,
                excerpt: h.chunk.text,
            })
            .collect();

        Ok(Answer {
            text,
            cited_sources,
        })
    }
}

//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait holds named collections of
//! [`EmbeddedChunk`]s and answers nearest-neighbour queries by cosine
//! distance. Two backends are provided:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteStore`] | persisted under `persist_dir`; used by the CLI and server |
//! | [`InMemoryStore`] | process-local; used by tests and embedding callers |
//!
//! # Contract
//!
//! - [`upsert`](VectorStore::upsert) is keyed by `(source_path, index)`:
//!   re-upserting a chunk replaces its text and vector in place, keeping its
//!   original insertion position.
//! - Every vector in a collection has the same dimensionality. The first
//!   upsert fixes it; later upserts or queries with another size are
//!   rejected with [`RagError::Store`](crate::error::RagError::Store).
//! - [`query`](VectorStore::query) returns at most `k` hits ordered by
//!   non-decreasing distance, ties broken by insertion order.
//! - A build writes into a staging collection and
//!   [`publish`](VectorStore::publish)es it in one step. Readers see either
//!   the previous build or the new one, never a partial one.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{RagError, Result};
use crate::models::{EmbeddedChunk, RetrievalResult, ScoredChunk};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Summary of a stored collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub name: String,
    pub dims: usize,
    pub chunk_count: usize,
    /// Embedding model recorded by the last completed build.
    pub model: Option<String>,
    pub built_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace chunks, keyed by `(source_path, index)`.
    async fn upsert(&self, collection: &str, chunks: &[EmbeddedChunk]) -> Result<()>;

    /// The `k` nearest chunks to `vector`, closest first.
    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<RetrievalResult>;

    /// Whether the collection holds any chunks.
    async fn exists(&self, collection: &str) -> Result<bool>;

    /// Remove the collection and all of its chunks.
    async fn clear(&self, collection: &str) -> Result<()>;

    async fn info(&self, collection: &str) -> Result<Option<CollectionInfo>>;

    /// Atomically replace `collection` with the contents of `staging` and
    /// record a completed build with `model`. `staging` is gone afterwards.
    ///
    /// # Errors
    ///
    /// [`RagError::Store`] when `staging` does not exist; `collection` is
    /// left untouched.
    async fn publish(&self, staging: &str, collection: &str, model: &str) -> Result<()>;

    /// Whether `collection` holds chunks from a completed build.
    async fn is_built(&self, collection: &str) -> Result<bool> {
        Ok(self
            .info(collection)
            .await?
            .map(|info| info.is_complete())
            .unwrap_or(false))
    }
}

impl CollectionInfo {
    /// Chunks are present and the build that wrote them finished.
    pub fn is_complete(&self) -> bool {
        self.chunk_count > 0 && self.built_at.is_some()
    }
}

/// Name of the collection a build of `collection` writes into before it
/// is published.
pub fn staging_name(collection: &str) -> String {
    format!("{}.building", collection)
}

pub(crate) fn missing_staging(staging: &str) -> RagError {
    RagError::Store(format!("staging collection '{}' does not exist", staging))
}

/// Dimensionality shared by all vectors in `chunks`.
///
/// Errors on empty vectors or mixed sizes. Returns `None` for an empty slice.
pub(crate) fn batch_dims(chunks: &[EmbeddedChunk]) -> Result<Option<usize>> {
    let Some(first) = chunks.first() else {
        return Ok(None);
    };
    let dims = first.vector.len();
    if dims == 0 {
        return Err(RagError::Store("embedding vectors must not be empty".into()));
    }
    if let Some(bad) = chunks.iter().find(|c| c.vector.len() != dims) {
        return Err(dims_mismatch(dims, bad.vector.len()));
    }
    Ok(Some(dims))
}

pub(crate) fn dims_mismatch(expected: usize, got: usize) -> RagError {
    RagError::Store(format!(
        "vector dimensionality mismatch: collection uses {}, got {}",
        expected, got
    ))
}

/// Sort hits nearest first and keep `k`. The sort is stable, so hits
/// arriving in insertion order keep that order on ties.
pub(crate) fn rank(mut hits: Vec<ScoredChunk>, k: usize) -> RetrievalResult {
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(k);
    hits
}

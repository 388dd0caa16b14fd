//! In-memory [`VectorStore`] implementation.
//!
//! Collections are `Vec`s in insertion order behind `std::sync::RwLock`.
//! Queries are brute-force cosine distance over every stored vector.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::embedding::cosine_distance;
use crate::error::{RagError, Result};
use crate::models::{EmbeddedChunk, RetrievalResult, ScoredChunk};

use super::{batch_dims, dims_mismatch, missing_staging, rank, CollectionInfo, VectorStore};

#[derive(Default)]
struct StoredCollection {
    dims: usize,
    chunks: Vec<EmbeddedChunk>,
    model: Option<String>,
    built_at: Option<DateTime<Utc>>,
}

/// Process-local vector store.
#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, StoredCollection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, StoredCollection>>> {
        self.collections
            .read()
            .map_err(|_| RagError::Store("in-memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, StoredCollection>>> {
        self.collections
            .write()
            .map_err(|_| RagError::Store("in-memory store lock poisoned".into()))
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn upsert(&self, collection: &str, chunks: &[EmbeddedChunk]) -> Result<()> {
        let Some(dims) = batch_dims(chunks)? else {
            return Ok(());
        };

        let mut collections = self.write()?;
        let stored = collections.entry(collection.to_string()).or_default();
        if stored.chunks.is_empty() {
            stored.dims = dims;
        } else if stored.dims != dims {
            return Err(dims_mismatch(stored.dims, dims));
        }

        for incoming in chunks {
            let existing = stored.chunks.iter_mut().find(|c| {
                c.chunk.source_path == incoming.chunk.source_path
                    && c.chunk.index == incoming.chunk.index
            });
            match existing {
                Some(slot) => *slot = incoming.clone(),
                None => stored.chunks.push(incoming.clone()),
            }
        }
        Ok(())
    }

    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<RetrievalResult> {
        let collections = self.read()?;
        let Some(stored) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        if stored.chunks.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != stored.dims {
            return Err(dims_mismatch(stored.dims, vector.len()));
        }

        let hits = stored
            .chunks
            .iter()
            .map(|c| ScoredChunk {
                chunk: c.chunk.clone(),
                distance: cosine_distance(vector, &c.vector),
            })
            .collect();
        Ok(rank(hits, k))
    }

    async fn exists(&self, collection: &str) -> Result<bool> {
        Ok(self
            .read()?
            .get(collection)
            .map(|c| !c.chunks.is_empty())
            .unwrap_or(false))
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        self.write()?.remove(collection);
        Ok(())
    }

    async fn info(&self, collection: &str) -> Result<Option<CollectionInfo>> {
        Ok(self.read()?.get(collection).map(|c| CollectionInfo {
            name: collection.to_string(),
            dims: c.dims,
            chunk_count: c.chunks.len(),
            model: c.model.clone(),
            built_at: c.built_at,
        }))
    }

    async fn publish(&self, staging: &str, collection: &str, model: &str) -> Result<()> {
        let mut collections = self.write()?;
        let mut built = collections
            .remove(staging)
            .ok_or_else(|| missing_staging(staging))?;
        built.model = Some(model.to_string());
        built.built_at = Some(Utc::now());
        collections.insert(collection.to_string(), built);
        Ok(())
    }
}

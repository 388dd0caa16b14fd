//! SQLite-backed [`VectorStore`].
//!
//! All collections live in one database file (`<persist_dir>/vectors.sqlite`):
//!
//! ```text
//! collections(name PK, dims, model, built_at)
//! chunks(seq PK AUTOINCREMENT, collection, source_path, chunk_index,
//!        text, hash, vector BLOB, UNIQUE(collection, source_path, chunk_index))
//! ```
//!
//! `seq` records insertion order; conflicting upserts update the row in
//! place so a replaced chunk keeps its original position. Publishing a
//! staging collection renames its rows, so `seq` order survives it. Vectors are
//! little-endian `f32` BLOBs (see [`vec_to_blob`]) and queries are
//! brute-force cosine distance over the collection.
//!
//! Ingestion opens the store with [`SqliteStore::open`]; serving opens it
//! with [`SqliteStore::open_read_only`].

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::debug;

use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::error::{RagError, Result};
use crate::models::{Chunk, EmbeddedChunk, RetrievalResult, ScoredChunk};

use super::{batch_dims, dims_mismatch, missing_staging, rank, CollectionInfo, VectorStore};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) a read-write store and ensure the schema.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = connect_options(db_path)?
            .journal_mode(SqliteJournalMode::Delete)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open an existing store without write access.
    ///
    /// # Errors
    ///
    /// [`RagError::Config`] when the database file or its schema is missing,
    /// i.e. the knowledge base has never been built.
    pub async fn open_read_only(db_path: &Path) -> Result<Self> {
        if !db_path.exists() {
            return Err(RagError::Config(format!(
                "persisted vector store not found at {} (run `campus-rag build` first)",
                db_path.display()
            )));
        }

        let options = connect_options(db_path)?.read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('collections', 'chunks')",
        )
        .fetch_one(&pool)
        .await?;
        if tables < 2 {
            pool.close().await;
            return Err(RagError::Config(format!(
                "vector store at {} has no schema (run `campus-rag build` first)",
                db_path.display()
            )));
        }

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                dims INTEGER NOT NULL DEFAULT 0,
                model TEXT,
                built_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                source_path TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                hash TEXT NOT NULL,
                vector BLOB NOT NULL,
                UNIQUE(collection, source_path, chunk_index)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_collection ON chunks(collection, seq)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn collection_dims(&self, collection: &str) -> Result<Option<usize>> {
        let dims: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT c.dims FROM collections c
            WHERE c.name = ? AND EXISTS (SELECT 1 FROM chunks WHERE collection = c.name)
            "#,
        )
        .bind(collection)
        .fetch_optional(&self.pool)
        .await?;
        Ok(dims.map(|d| d as usize))
    }
}

fn connect_options(db_path: &Path) -> Result<SqliteConnectOptions> {
    Ok(SqliteConnectOptions::from_str(&format!(
        "sqlite:{}",
        db_path.display()
    ))?)
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn upsert(&self, collection: &str, chunks: &[EmbeddedChunk]) -> Result<()> {
        let Some(dims) = batch_dims(chunks)? else {
            return Ok(());
        };
        if let Some(existing) = self.collection_dims(collection).await? {
            if existing != dims {
                return Err(dims_mismatch(existing, dims));
            }
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO collections (name, dims) VALUES (?, ?)
            ON CONFLICT(name) DO UPDATE SET dims = excluded.dims
            "#,
        )
        .bind(collection)
        .bind(dims as i64)
        .execute(&mut *tx)
        .await?;

        for embedded in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (collection, source_path, chunk_index, text, hash, vector)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, source_path, chunk_index) DO UPDATE SET
                    text = excluded.text,
                    hash = excluded.hash,
                    vector = excluded.vector
                "#,
            )
            .bind(collection)
            .bind(&embedded.chunk.source_path)
            .bind(embedded.chunk.index as i64)
            .bind(&embedded.chunk.text)
            .bind(embedded.chunk.content_hash())
            .bind(vec_to_blob(&embedded.vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(collection, count = chunks.len(), "upserted chunks to sqlite");
        Ok(())
    }

    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<RetrievalResult> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let Some(dims) = self.collection_dims(collection).await? else {
            return Ok(Vec::new());
        };
        if vector.len() != dims {
            return Err(dims_mismatch(dims, vector.len()));
        }

        let rows = sqlx::query(
            r#"
            SELECT source_path, chunk_index, text, vector
            FROM chunks
            WHERE collection = ?
            ORDER BY seq
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let hits = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("vector");
                let index: i64 = row.get("chunk_index");
                ScoredChunk {
                    chunk: Chunk::new(
                        row.get::<String, _>("source_path"),
                        index as usize,
                        row.get::<String, _>("text"),
                    ),
                    distance: cosine_distance(vector, &blob_to_vec(&blob)),
                }
            })
            .collect();

        Ok(rank(hits, k))
    }

    async fn exists(&self, collection: &str) -> Result<bool> {
        let found: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM chunks WHERE collection = ?)")
                .bind(collection)
                .fetch_one(&self.pool)
                .await?;
        Ok(found)
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE collection = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn info(&self, collection: &str) -> Result<Option<CollectionInfo>> {
        let row = sqlx::query(
            r#"
            SELECT c.dims, c.model, c.built_at,
                   (SELECT COUNT(*) FROM chunks WHERE collection = c.name) AS chunk_count
            FROM collections c
            WHERE c.name = ?
            "#,
        )
        .bind(collection)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let dims: i64 = row.get("dims");
            let chunk_count: i64 = row.get("chunk_count");
            let built_at: Option<i64> = row.get("built_at");
            CollectionInfo {
                name: collection.to_string(),
                dims: dims as usize,
                chunk_count: chunk_count as usize,
                model: row.get("model"),
                built_at: built_at.and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
            }
        }))
    }

    async fn publish(&self, staging: &str, collection: &str, model: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let staged: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM collections WHERE name = ?)")
                .bind(staging)
                .fetch_one(&mut *tx)
                .await?;
        if !staged {
            return Err(missing_staging(staging));
        }

        sqlx::query("DELETE FROM chunks WHERE collection = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE chunks SET collection = ? WHERE collection = ?")
            .bind(collection)
            .bind(staging)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE collections SET name = ?, model = ?, built_at = ? WHERE name = ?")
            .bind(collection)
            .bind(model)
            .bind(Utc::now().timestamp())
            .bind(staging)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(staging, collection, "published collection");
        Ok(())
    }
}

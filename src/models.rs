//! Core data types that flow through ingestion and querying.
//!
//! Ingestion produces [`Chunk`]s, pairs them with vectors as
//! [`EmbeddedChunk`]s and persists them. Querying yields [`ScoredChunk`]s
//! (the retrieval result) and finally an [`Answer`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A bounded slice of one source file. Identified by `(source_path, index)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    /// Path relative to the ingestion root, `/`-separated.
    pub source_path: String,
    pub index: usize,
}

impl Chunk {
    pub fn new(source_path: impl Into<String>, index: usize, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_path: source_path.into(),
            index,
        }
    }

    /// SHA-256 of the chunk text, hex encoded.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A chunk together with its embedding vector.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// One retrieval hit. Lower `distance` means more similar.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine distance, `1 - cosine_similarity`, in `[0, 2]`.
    pub distance: f32,
}

/// Ordered nearest-first, at most `k` entries.
pub type RetrievalResult = Vec<ScoredChunk>;

/// A cited source returned alongside an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCitation {
    #[serde(rename = "source")]
    pub source_path: String,
    #[serde(rename = "content")]
    pub excerpt: String,
}

/// The response to a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    #[serde(rename = "answer")]
    pub text: String,
    #[serde(rename = "source_documents")]
    pub cited_sources: Vec<SourceCitation>,
}

impl Answer {
    /// An answer with no cited sources.
    pub fn uncited(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cited_sources: Vec::new(),
        }
    }
}

/// Request body for `POST /ask`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Query {
    #[serde(default)]
    pub question: String,
}

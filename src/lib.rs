//! # Campus RAG
//!
//! A retrieval-augmented question-answering assistant for campus
//! information (library hours, scholarships, dormitories, canteens,
//! courses).
//!
//! A one-shot build turns a directory of plain-text notes into an
//! embedded, persisted collection; the query service answers questions
//! by retrieving the nearest chunks and asking a chat model to answer
//! strictly from them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ source_dir   │──▶│ Chunk+Embed │──▶│   SQLite     │
//! │ **/*.txt     │   │  (build)    │   │ vector store │
//! └──────────────┘   └─────────────┘   └──────┬───────┘
//!                                             │ read-only
//!                     ┌───────────────────────┤
//!                     ▼                       ▼
//!               ┌──────────┐           ┌────────────┐
//!               │   CLI    │           │ HTTP /ask  │
//!               │  (ask)   │           │  (serve)   │
//!               └──────────┘           └────────────┘
//! ```
//!
//! A keyword [`rules`] table answers the common questions without any
//! provider, either in front of the query service or on its own.
//!
//! ## Quick Start
//!
//! ```bash
//! export OPENAI_API_KEY=...
//! campus-rag build                  # embed ./knowledge_source into ./chroma_db
//! campus-rag ask "图书馆几点开门"
//! campus-rag serve                  # POST /ask on 127.0.0.1:8000
//! campus-rag serve --offline        # rules only, no credentials needed
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`chunk`] | Overlapping text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generation`] | Chat answer generation |
//! | [`http`] | Provider request loop with timeout and retry |
//! | [`store`] | Vector store trait, SQLite and in-memory backends |
//! | [`lock`] | Build lock |
//! | [`ingest`] | Knowledge-base build pipeline |
//! | [`query`] | Retrieval-augmented `ask` |
//! | [`rules`] | Keyword rule matcher |
//! | [`server`] | HTTP server |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod http;
pub mod ingest;
pub mod lock;
pub mod models;
pub mod query;
pub mod rules;
pub mod server;
pub mod store;

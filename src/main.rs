//! # Campus RAG CLI (`campus-rag`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `campus-rag build` | Embed the source directory into the vector store |
//! | `campus-rag ask "<question>"` | Answer one question from the command line |
//! | `campus-rag match "<question>"` | Look a question up in the keyword rules |
//! | `campus-rag serve` | Start the HTTP server |
//! | `campus-rag status` | Show what the vector store holds |
//!
//! Every command accepts `--config <file>`; without it the built-in
//! defaults are used. Logging goes to stderr and is controlled by
//! `RUST_LOG` (default `campus_rag=info`).

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use campus_rag::config::{self, Config};
use campus_rag::error::RagError;
use campus_rag::store::{SqliteStore, VectorStore};
use campus_rag::{ingest, lock, query, rules, server};

/// Campus information assistant backed by retrieval-augmented generation.
#[derive(Parser)]
#[command(name = "campus-rag", version)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the knowledge base from the source directory.
    ///
    /// A completed collection is left as is unless `--force` is given.
    Build {
        /// Rebuild even if the collection is already built.
        #[arg(long)]
        force: bool,

        /// Show file and chunk counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,

        #[arg(long)]
        source_dir: Option<PathBuf>,

        #[arg(long)]
        persist_dir: Option<PathBuf>,

        #[arg(long)]
        collection: Option<String>,

        #[arg(long)]
        chunk_size: Option<usize>,

        #[arg(long)]
        chunk_overlap: Option<usize>,
    },

    /// Ask a question against the built knowledge base.
    Ask { question: String },

    /// Match a question against the keyword rules only.
    Match { question: String },

    /// Start the HTTP server.
    Serve {
        /// Answer from the keyword rules only; no providers are contacted.
        #[arg(long)]
        offline: bool,
    },

    /// Show collection details and build lock state.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("campus_rag=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Build {
            force,
            dry_run,
            source_dir,
            persist_dir,
            collection,
            chunk_size,
            chunk_overlap,
        } => {
            if let Some(dir) = source_dir {
                cfg.ingest.source_dir = dir;
            }
            if let Some(dir) = persist_dir {
                cfg.store.persist_dir = dir;
            }
            if let Some(name) = collection {
                cfg.store.collection = name;
            }
            if let Some(size) = chunk_size {
                cfg.ingest.chunk_size = size;
            }
            if let Some(overlap) = chunk_overlap {
                cfg.ingest.chunk_overlap = overlap;
            }
            cfg.validate()?;
            ingest::run_build(&cfg, force, dry_run)
                .await
                .context("build failed")?;
        }
        Commands::Ask { question } => {
            let question = question.trim();
            if question.is_empty() {
                return Err(RagError::Validation("question must not be empty".into()).into());
            }
            let service = query::QueryService::from_config(&cfg)
                .await
                .context("query service not ready")?;
            let answer = service.ask(question).await?;

            println!("{}", answer.text);
            if !answer.cited_sources.is_empty() {
                println!();
                println!("sources:");
                for (i, source) in answer.cited_sources.iter().enumerate() {
                    println!("  {}. {}", i + 1, source.source_path);
                    println!("     {}", query::excerpt(&source.excerpt, 200));
                }
            }
        }
        Commands::Match { question } => {
            let matcher = rules::RuleMatcher::from_config(&cfg.rules);
            match matcher.match_question(&question) {
                Some(m) => {
                    println!("category: {}", m.category);
                    println!("{}", m.answer);
                }
                None => println!("{}", rules::FALLBACK_HINT),
            }
        }
        Commands::Serve { offline } => {
            server::run_server(&cfg, offline).await?;
        }
        Commands::Status => {
            print_status(&cfg).await?;
        }
    }

    Ok(())
}

async fn print_status(cfg: &Config) -> anyhow::Result<()> {
    let persist_dir = &cfg.store.persist_dir;
    println!("store: {}", persist_dir.display());
    println!(
        "  build lock: {}",
        if lock::is_locked(persist_dir) {
            "held"
        } else {
            "free"
        }
    );

    let db_path = cfg.store.db_path();
    if !db_path.exists() {
        println!("  collection {}: not built", cfg.store.collection);
        return Ok(());
    }

    let store = SqliteStore::open_read_only(&db_path).await?;
    match store.info(&cfg.store.collection).await? {
        Some(info) => {
            println!("  collection: {}", info.name);
            println!("  chunks: {}", info.chunk_count);
            println!("  dims: {}", info.dims);
            println!("  model: {}", info.model.as_deref().unwrap_or("unknown"));
            match info.built_at {
                Some(ts) => println!("  built at: {}", ts.to_rfc3339()),
                None => println!("  built at: incomplete"),
            }
        }
        None => println!("  collection {}: not built", cfg.store.collection),
    }
    store.close().await;
    Ok(())
}

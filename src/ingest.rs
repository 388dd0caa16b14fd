//! Knowledge-base build pipeline.
//!
//! Scans `source_dir` recursively for files matching the include globs,
//! chunks each non-blank file, embeds the chunks in batches and upserts
//! them into the configured collection:
//!
//! ```text
//! source_dir ──scan──▶ SourceFile ──chunk──▶ Chunk ──embed──▶ EmbeddedChunk ──upsert──▶ VectorStore
//! ```
//!
//! Chunks are written to a staging collection and published over the
//! target only once every batch is embedded, so a failed build leaves the
//! previous collection as it was. A completed collection is left untouched
//! unless the build is forced; an unfinished one is always rebuilt.
//! [`run_build`] is the CLI entry point and holds the [`BuildLock`] for
//! the whole build.

use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunk::chunk_text;
use crate::config::{Config, IngestConfig};
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{ProviderErrorKind, RagError, Result};
use crate::lock::BuildLock;
use crate::models::{Chunk, EmbeddedChunk};
use crate::store::{staging_name, SqliteStore, VectorStore};

/// A readable, non-blank source file.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to `source_dir`, `/`-separated.
    pub relative_path: String,
    pub text: String,
}

/// Files selected for ingestion and their chunks.
#[derive(Debug, Default)]
pub struct PreparedSources {
    pub files: usize,
    /// Blank or unreadable files that matched the globs.
    pub skipped_files: usize,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    Built,
    /// The collection already held a completed build and the build was not
    /// forced.
    SkippedExisting,
}

/// Whether a build has work to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPlan {
    Build,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub status: IngestStatus,
    pub files: usize,
    pub skipped_files: usize,
    pub chunks: usize,
    pub embedded: usize,
}

impl IngestReport {
    fn skipped() -> Self {
        Self {
            status: IngestStatus::SkippedExisting,
            files: 0,
            skipped_files: 0,
            chunks: 0,
            embedded: 0,
        }
    }
}

/// Scan `config.source_dir` for ingestible files, sorted by relative path.
///
/// # Errors
///
/// [`RagError::Config`] when the directory does not exist, a glob is
/// invalid, or no non-blank file matches.
pub fn scan_sources(config: &IngestConfig) -> Result<(Vec<SourceFile>, usize)> {
    let root = &config.source_dir;
    if !root.is_dir() {
        return Err(RagError::Config(format!(
            "source directory does not exist: {}",
            root.display()
        )));
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/.*".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();
    let mut skipped = 0usize;

    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| RagError::Store(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = relative_path(root, path);

        if exclude_set.is_match(&relative) || !include_set.is_match(&relative) {
            continue;
        }

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %relative, error = %e, "skipping unreadable file");
                skipped += 1;
                continue;
            }
        };
        if text.trim().is_empty() {
            debug!(path = %relative, "skipping blank file");
            skipped += 1;
            continue;
        }

        files.push(SourceFile {
            relative_path: relative,
            text,
        });
    }

    if files.is_empty() {
        return Err(RagError::Config(format!(
            "no non-blank files matching {:?} under {}",
            config.include_globs,
            root.display()
        )));
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok((files, skipped))
}

/// Scan and chunk every source file without embedding anything.
pub fn prepare_sources(config: &IngestConfig) -> Result<PreparedSources> {
    let (files, skipped_files) = scan_sources(config)?;
    let chunks = files
        .iter()
        .flat_map(|f| {
            chunk_text(
                &f.relative_path,
                &f.text,
                config.chunk_size,
                config.chunk_overlap,
            )
        })
        .collect();

    Ok(PreparedSources {
        files: files.len(),
        skipped_files,
        chunks,
    })
}

/// Decide whether `collection` needs building.
///
/// Only a completed build is skipped, and only when not forced. Chunks left
/// by a build that never finished are rebuilt without `force`.
pub async fn plan_build(
    store: &dyn VectorStore,
    collection: &str,
    force: bool,
) -> Result<BuildPlan> {
    if force {
        return Ok(BuildPlan::Build);
    }
    if store.is_built(collection).await? {
        info!(
            collection,
            "collection already built; skipping (use --force to rebuild)"
        );
        return Ok(BuildPlan::Skip);
    }
    if store.exists(collection).await? {
        warn!(collection, "collection has an unfinished build; rebuilding");
    }
    Ok(BuildPlan::Build)
}

/// Build `collection` from `config.source_dir` unless [`plan_build`] says
/// it is already built.
pub async fn ingest_directory(
    store: &dyn VectorStore,
    embedder: &dyn EmbeddingProvider,
    config: &IngestConfig,
    collection: &str,
    batch_size: usize,
    force: bool,
) -> Result<IngestReport> {
    match plan_build(store, collection, force).await? {
        BuildPlan::Skip => Ok(IngestReport::skipped()),
        BuildPlan::Build => {
            build_collection(store, embedder, config, collection, batch_size).await
        }
    }
}

/// Scan, chunk and embed `config.source_dir` into a staging collection,
/// then publish it over `collection`.
///
/// Chunks are embedded `batch_size` at a time. Any scan or provider error
/// returns before the publish, leaving `collection` unchanged.
pub async fn build_collection(
    store: &dyn VectorStore,
    embedder: &dyn EmbeddingProvider,
    config: &IngestConfig,
    collection: &str,
    batch_size: usize,
) -> Result<IngestReport> {
    let prepared = prepare_sources(config)?;
    info!(
        collection,
        files = prepared.files,
        chunk_count = prepared.chunks.len(),
        "prepared sources"
    );

    let staging = staging_name(collection);
    store.clear(&staging).await?;

    let mut embedded = 0usize;
    for batch in prepared.chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        if vectors.len() != batch.len() {
            return Err(RagError::provider(
                embedder.model_name(),
                ProviderErrorKind::Malformed,
                format!("expected {} embeddings, got {}", batch.len(), vectors.len()),
            ));
        }

        let records: Vec<EmbeddedChunk> = batch
            .iter()
            .cloned()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddedChunk { chunk, vector })
            .collect();
        store.upsert(&staging, &records).await?;

        embedded += records.len();
        debug!(collection, embedded, total = prepared.chunks.len(), "staged batch");
    }

    store.publish(&staging, collection, embedder.model_name()).await?;
    info!(collection, chunk_count = embedded, "build complete");

    Ok(IngestReport {
        status: IngestStatus::Built,
        files: prepared.files,
        skipped_files: prepared.skipped_files,
        chunks: prepared.chunks.len(),
        embedded,
    })
}

/// CLI entry point for `campus-rag build`.
///
/// A dry run only scans and chunks, so it needs neither credentials nor
/// the lock. Otherwise the build lock is held until the build finishes and
/// the embedding provider is created only when there is work to do.
pub async fn run_build(config: &Config, force: bool, dry_run: bool) -> Result<IngestReport> {
    let collection = &config.store.collection;

    if dry_run {
        let prepared = prepare_sources(&config.ingest)?;
        println!("build {} (dry-run)", collection);
        println!("  source dir: {}", config.ingest.source_dir.display());
        println!("  files: {}", prepared.files);
        println!("  skipped files: {}", prepared.skipped_files);
        println!("  estimated chunks: {}", prepared.chunks.len());
        return Ok(IngestReport {
            status: IngestStatus::Built,
            files: prepared.files,
            skipped_files: prepared.skipped_files,
            chunks: prepared.chunks.len(),
            embedded: 0,
        });
    }

    let _lock = BuildLock::acquire(&config.store.persist_dir)?;
    let store = SqliteStore::open(&config.store.db_path()).await?;

    let outcome = build_with_config(&store, config, force).await;
    store.close().await;
    let report = outcome?;

    match report.status {
        IngestStatus::SkippedExisting => {
            println!("build {}", collection);
            println!(
                "  collection already exists in {}; skipped (use --force to rebuild)",
                config.store.persist_dir.display()
            );
        }
        IngestStatus::Built => {
            println!("build {}", collection);
            println!("  files: {}", report.files);
            println!("  skipped files: {}", report.skipped_files);
            println!("  chunks written: {}", report.chunks);
            println!("  embeddings written: {}", report.embedded);
            println!("  model: {}", config.embedding.model);
            println!("ok");
        }
    }

    Ok(report)
}

/// The provider is created only when there is work to do, so a skipped
/// build needs no credentials.
async fn build_with_config(
    store: &SqliteStore,
    config: &Config,
    force: bool,
) -> Result<IngestReport> {
    let collection = &config.store.collection;
    match plan_build(store, collection, force).await? {
        BuildPlan::Skip => Ok(IngestReport::skipped()),
        BuildPlan::Build => {
            let embedder = create_provider(&config.embedding)?;
            build_collection(
                store,
                embedder.as_ref(),
                &config.ingest,
                collection,
                config.embedding.batch_size,
            )
            .await
        }
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| RagError::Config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| RagError::Config(format!("invalid glob set: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn ingest_config(root: &Path) -> IngestConfig {
        IngestConfig {
            source_dir: root.to_path_buf(),
            ..IngestConfig::default()
        }
    }

    #[test]
    fn test_scan_relative_paths_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::write(dir.path().join("sub/a.txt"), "a").unwrap();
        fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let (files, skipped) = scan_sources(&ingest_config(dir.path())).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["b.txt", "sub/a.txt"]);
        assert_eq!(skipped, 0);
    }

    #[test]
    fn test_blank_files_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("blank.txt"), "  \n\t").unwrap();
        fs::write(dir.path().join("real.txt"), "食堂 6:30 开门").unwrap();

        let (files, skipped) = scan_sources(&ingest_config(dir.path())).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "real.txt");
        assert_eq!(skipped, 1);
    }

    #[test]
    fn test_no_files_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("readme.md"), "x").unwrap();
        assert!(matches!(
            scan_sources(&ingest_config(dir.path())).unwrap_err(),
            RagError::Config(_)
        ));
    }

    #[test]
    fn test_missing_dir_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = ingest_config(&dir.path().join("missing"));
        assert!(matches!(
            scan_sources(&config).unwrap_err(),
            RagError::Config(_)
        ));
    }

    #[test]
    fn test_exclude_globs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("drafts")).unwrap();
        fs::write(dir.path().join("keep.txt"), "k").unwrap();
        fs::write(dir.path().join("drafts/wip.txt"), "w").unwrap();

        let config = IngestConfig {
            exclude_globs: vec!["drafts/**".to_string()],
            ..ingest_config(dir.path())
        };
        let (files, _) = scan_sources(&config).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "keep.txt");
    }

    #[test]
    fn test_prepare_chunks_each_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "x".repeat(120)).unwrap();
        fs::write(dir.path().join("b.txt"), "short").unwrap();

        let config = IngestConfig {
            chunk_size: 50,
            chunk_overlap: 10,
            ..ingest_config(dir.path())
        };
        let prepared = prepare_sources(&config).unwrap();
        assert_eq!(prepared.files, 2);
        assert!(prepared.chunks.len() >= 4);
        let last = prepared.chunks.last().unwrap();
        assert_eq!(last.source_path, "b.txt");
        assert_eq!(last.index, 0);
    }
}

//! Knowledge-base ingestion.
//!
//! Walks `[ingest].root`, extracts text from every matching file, splits it
//! into paragraph-aligned chunks, embeds each chunk and adds one document per
//! chunk. Ingestion runs offline; the bot tolerates documents appearing while
//! it serves traffic.
//!
//! ```text
//! walk (walkdir + globset) → extract → split_into_chunks → embed → DocumentStore::add
//! ```
//!
//! A file that cannot be read or extracted is skipped with a warning. A chunk
//! whose embedding fails after the bounded retry is skipped as well, so one
//! bad file never aborts the run.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

use consult_core::chunk::split_into_chunks;
use consult_core::embedding::{truncate_for_embedding, Embedder};
use consult_core::error::PipelineError;
use consult_core::models::NewDocument;
use consult_core::store::DocumentStore;

use crate::config::{Config, IngestConfig};
use crate::db;
use crate::embedding::create_embedder;
use crate::extract::{extract_text, FileKind};
use crate::retry::{retry, RetryPolicy};
use crate::sqlite_store::SqliteStore;

/// A file selected for ingestion.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the ingest root, with `/` separators. Used as the
    /// document's source id.
    pub relative: String,
    pub kind: FileKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub files_found: usize,
    pub files_skipped: usize,
    pub chunks: usize,
    pub documents_added: usize,
    pub chunks_failed: usize,
}

/// Settings for one ingestion run.
#[derive(Debug, Clone, Copy)]
pub struct IngestSettings {
    pub max_chunk_chars: usize,
    pub max_input_chars: usize,
    pub retry: RetryPolicy,
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_chunk_chars: config.chunking.max_chars,
            max_input_chars: config.embedding.max_input_chars,
            retry: RetryPolicy::new(
                config.crm.max_attempts,
                Duration::from_millis(config.crm.backoff_ms),
            ),
        }
    }
}

/// Entry point for `consult-bot ingest`.
pub async fn run_ingest(config: &Config, dry_run: bool) -> Result<IngestSummary> {
    let ingest = config
        .ingest
        .as_ref()
        .context("No [ingest] section in config")?;
    let files = scan_files(ingest)?;
    let settings = IngestSettings::from_config(config);

    if dry_run {
        let summary = count_chunks(&files, settings.max_chunk_chars);
        println!("ingest {} (dry-run)", ingest.root.display());
        println!("  files found: {}", summary.files_found);
        println!("  files skipped: {}", summary.files_skipped);
        println!("  chunks: {}", summary.chunks);
        return Ok(summary);
    }

    if !config.embedding.is_enabled() {
        bail!("Ingestion requires an embedding provider. Set [embedding] provider in config.");
    }
    let embedder = create_embedder(config)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::with_dims(pool.clone(), config.embedding.dims);

    let summary = ingest_files(&files, embedder, &store, &settings).await?;
    pool.close().await;

    println!("ingest {}", ingest.root.display());
    println!("  files found: {}", summary.files_found);
    println!("  files skipped: {}", summary.files_skipped);
    println!("  chunks: {}", summary.chunks);
    println!("  documents added: {}", summary.documents_added);
    if summary.chunks_failed > 0 {
        println!("  chunks failed: {}", summary.chunks_failed);
    }
    println!("ok");
    Ok(summary)
}

/// Files under the ingest root that match the include globs, miss the
/// exclude globs and have a supported extension, sorted by relative path.
pub fn scan_files(ingest: &IngestConfig) -> Result<Vec<SourceFile>> {
    let root = &ingest.root;
    if !root.exists() {
        bail!("Ingest root does not exist: {}", root.display());
    }

    let include_set = build_globset(&ingest.include_globs)?;
    let mut excludes = vec!["**/.git/**".to_string(), "**/.*".to_string()];
    excludes.extend(ingest.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(ingest.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        if exclude_set.is_match(&relative) || !include_set.is_match(&relative) {
            continue;
        }
        let Some(kind) = FileKind::from_path(path) else {
            tracing::debug!(file = %relative, "unsupported extension, skipping");
            continue;
        };
        files.push(SourceFile {
            path: path.to_path_buf(),
            relative,
            kind,
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

fn read_text(file: &SourceFile) -> Option<(String, i64)> {
    let bytes = match std::fs::read(&file.path) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(file = %file.relative, error = %e, "failed to read file");
            return None;
        }
    };
    match extract_text(&bytes, file.kind) {
        Ok(text) if !text.trim().is_empty() => Some((text, bytes.len() as i64)),
        Ok(_) => {
            tracing::warn!(file = %file.relative, "no text extracted, skipping");
            None
        }
        Err(e) => {
            tracing::warn!(file = %file.relative, error = %e, "extraction failed, skipping");
            None
        }
    }
}

/// Count files and chunks without embedding or writing anything.
pub fn count_chunks(files: &[SourceFile], max_chunk_chars: usize) -> IngestSummary {
    let mut summary = IngestSummary {
        files_found: files.len(),
        ..Default::default()
    };
    for file in files {
        match read_text(file) {
            Some((text, _)) => summary.chunks += split_into_chunks(&text, max_chunk_chars).len(),
            None => summary.files_skipped += 1,
        }
    }
    summary
}

/// Extract, chunk, embed and store every file.
pub async fn ingest_files(
    files: &[SourceFile],
    embedder: Arc<dyn Embedder>,
    store: &dyn DocumentStore,
    settings: &IngestSettings,
) -> Result<IngestSummary> {
    let mut summary = IngestSummary {
        files_found: files.len(),
        ..Default::default()
    };

    for file in files {
        let Some((text, byte_size)) = read_text(file) else {
            summary.files_skipped += 1;
            continue;
        };
        let chunks = split_into_chunks(&text, settings.max_chunk_chars);
        summary.chunks += chunks.len();

        for chunk in &chunks {
            let input = truncate_for_embedding(&chunk.text, settings.max_input_chars);
            let embedded = retry(
                &settings.retry,
                "embed chunk",
                PipelineError::is_rate_limited,
                |_| embedder.embed(input),
            )
            .await;

            let vector = match embedded {
                Ok(done) => done.value,
                Err(failed) => {
                    tracing::warn!(
                        file = %file.relative,
                        chunk = chunk.index,
                        attempts = failed.attempts,
                        error = %failed.value,
                        "embedding failed, chunk skipped"
                    );
                    summary.chunks_failed += 1;
                    continue;
                }
            };

            let doc = NewDocument {
                filename: format!("{}#{}", display_name(&file.path), chunk.index),
                content: chunk.text.clone(),
                file_type: Some(file.kind.as_str().to_string()),
                byte_size: Some(byte_size),
                source_id: Some(file.relative.clone()),
            };
            store
                .add(&doc, &vector)
                .await
                .with_context(|| format!("Failed to store chunk {} of {}", chunk.index, file.relative))?;
            summary.documents_added += 1;
        }

        tracing::info!(file = %file.relative, chunks = chunks.len(), "file ingested");
    }

    Ok(summary)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

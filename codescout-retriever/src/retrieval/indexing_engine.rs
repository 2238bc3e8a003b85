//! Indexing pipeline: discovery → chunk → embed → upsert → analyze → persist.
//!
//! One engine instance is bound to a (workspace, revision) snapshot. Each
//! run walks the selected files, skips the unchanged ones (digest + mtime +
//! size all match the stored record), and replaces every changed file's
//! rows as a unit: vector points first, then symbols/references/edges, then
//! lexical rows together with the file record. Running the same content
//! twice is a no-op because every identity is content-addressed.
//!
//! "Index everything" and "index these paths" are the same pipeline under a
//! [`FileSelection`] policy; per-file behavior is identical in both modes.

use anyhow::Result;
use codescout_analyze::{ChunkerConfig, Language, analyze_python, chunk_file};
use codescout_embed::EmbeddingProvider;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::discovery::discover_files;
use super::identity::{
    bytes_digest, detect_revision, mtime_seconds, point_id, symbol_id, text_digest,
    workspace_id_for,
};
use super::paths::{normalize_relative, resolve_in_workspace, to_unix_string};
use super::snapshot_index::{
    CallEdgeRecord, ChunkFtsRow, FileRecord, RefRecord, SnapshotIndex, SymbolRecord,
};
use super::vector_index::{ChunkPayload, VectorIndex, VectorPoint};

/// Unchanged files only report progress every this many files.
const UNCHANGED_PROGRESS_STRIDE: usize = 25;

/// Configuration for the indexing engine
#[derive(Debug, Clone)]
pub struct IndexingEngineConfig {
    /// Root directory of the workspace being indexed.
    pub workspace_root: PathBuf,
    /// Pin the revision instead of asking git.
    pub revision_override: Option<String>,
    /// Chunking limits.
    pub chunker_config: ChunkerConfig,
}

impl IndexingEngineConfig {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self {
            workspace_root,
            revision_override: None,
            chunker_config: ChunkerConfig::default(),
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision_override = Some(revision.into());
        self
    }

    pub fn with_max_chunk_chars(mut self, max_chunk_chars: usize) -> Self {
        self.chunker_config.max_chunk_chars = max_chunk_chars;
        self
    }
}

/// Which files a run covers.
#[derive(Debug, Clone)]
pub enum FileSelection {
    /// Walk the whole workspace with ignore rules.
    FullDiscovery,
    /// Only these workspace-relative paths.
    Paths(Vec<String>),
}

/// Progress report handed to the run callback.
#[derive(Debug, Clone)]
pub struct IndexProgress {
    pub fraction: f64,
    pub processed: usize,
    pub total: usize,
    pub message: String,
}

pub type ProgressFn = Box<dyn Fn(IndexProgress) + Send + Sync>;

/// Result of one indexing run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexSummary {
    pub files_total: usize,
    pub files_changed: usize,
}

/// Orchestrates the per-file pipeline against one snapshot.
pub struct IndexingEngine {
    config: IndexingEngineConfig,
    workspace_id: String,
    revision: String,
    snapshot: SnapshotIndex,
    vectors: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl IndexingEngine {
    pub async fn new(
        config: IndexingEngineConfig,
        snapshot: SnapshotIndex,
        vectors: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let workspace_id = workspace_id_for(&config.workspace_root);
        let revision = match &config.revision_override {
            Some(revision) => revision.clone(),
            None => detect_revision(&config.workspace_root).await,
        };
        info!(
            "Indexing engine ready: workspace {} at revision {}",
            &workspace_id[..12],
            revision
        );
        snapshot
            .ensure_workspace(&workspace_id, &config.workspace_root.to_string_lossy())
            .await?;
        Ok(Self {
            config,
            workspace_id,
            revision,
            snapshot,
            vectors,
            embedder,
        })
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Run the pipeline over the selected files.
    pub async fn run(
        &self,
        selection: FileSelection,
        progress: Option<ProgressFn>,
    ) -> Result<IndexSummary> {
        self.snapshot
            .touch_snapshot(&self.workspace_id, &self.revision)
            .await?;

        let files = self.select_files(selection)?;
        let total = files.len();
        let mut changed = 0usize;
        info!("Indexing {} candidate files", total);

        for (processed, path) in files.iter().enumerate() {
            let processed = processed + 1;
            match self.index_one(path).await {
                Ok(true) => {
                    changed += 1;
                    report(&progress, processed, total, format!("indexed {path}"));
                }
                Ok(false) => {
                    if processed % UNCHANGED_PROGRESS_STRIDE == 0 {
                        report(&progress, processed, total, format!("unchanged {path}"));
                    }
                }
                Err(err) => {
                    warn!("Skipping {path}: {err}");
                }
            }
        }

        report(&progress, total, total, "done".to_string());
        info!("Indexing finished: {changed} of {total} files changed");
        Ok(IndexSummary {
            files_total: total,
            files_changed: changed,
        })
    }

    fn select_files(&self, selection: FileSelection) -> Result<Vec<String>> {
        match selection {
            FileSelection::FullDiscovery => {
                let discovered = discover_files(&self.config.workspace_root)?;
                Ok(discovered.iter().map(|p| to_unix_string(p)).collect())
            }
            FileSelection::Paths(paths) => {
                let mut selected = Vec::with_capacity(paths.len());
                for path in paths {
                    selected.push(normalize_relative(&path)?);
                }
                selected.sort();
                selected.dedup();
                Ok(selected)
            }
        }
    }

    /// Index a single file; returns whether it was changed. Unchanged files
    /// produce zero writes.
    async fn index_one(&self, relative_path: &str) -> Result<bool> {
        // Rejects symlinked escapes before the file is ever read.
        let full_path = resolve_in_workspace(&self.config.workspace_root, relative_path)?;
        let bytes = tokio::fs::read(&full_path).await?;
        let metadata = tokio::fs::metadata(&full_path).await?;
        let digest = bytes_digest(&bytes);
        let mtime = mtime_seconds(&metadata);
        let size = metadata.len() as i64;
        let language = Language::from_path(relative_path);

        let stored = self
            .snapshot
            .get_file_record(&self.workspace_id, &self.revision, relative_path)
            .await?;
        if let Some(stored) = &stored
            && stored.digest == digest
            && stored.mtime == mtime
            && stored.size == size
        {
            return Ok(false);
        }

        debug!("Reindexing {relative_path}");
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let chunks = chunk_file(relative_path, &text, language, &self.config.chunker_config);

        // Stale points must go before the new ones land, so a shrinking
        // file cannot leave trailing chunks behind.
        self.vectors
            .delete_by_file(&self.workspace_id, &self.revision, relative_path)
            .await?;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embedded = self.embedder.embed_texts(&texts).await?;
        let updated_at = chrono::Utc::now().to_rfc3339();

        let mut points = Vec::with_capacity(chunks.len());
        let mut fts_rows = Vec::with_capacity(chunks.len());
        for (chunk, embedding) in chunks.iter().zip(embedded.embeddings) {
            let digest = text_digest(&chunk.text);
            let symbol_name = chunk.symbol_name.clone().unwrap_or_default();
            points.push(VectorPoint {
                id: point_id(
                    &self.workspace_id,
                    &self.revision,
                    relative_path,
                    chunk.start_line,
                    chunk.end_line,
                    &digest,
                ),
                payload: ChunkPayload {
                    workspace_id: self.workspace_id.clone(),
                    revision: self.revision.clone(),
                    path: relative_path.to_string(),
                    language: chunk.language.as_str().to_string(),
                    chunk_kind: chunk.kind.as_str().to_string(),
                    symbol_name: symbol_name.clone(),
                    start_line: chunk.start_line as i64,
                    end_line: chunk.end_line as i64,
                    text: chunk.text.clone(),
                    text_digest: digest,
                    updated_at: updated_at.clone(),
                },
                embedding,
            });
            fts_rows.push(ChunkFtsRow {
                workspace_id: self.workspace_id.clone(),
                revision: self.revision.clone(),
                path: relative_path.to_string(),
                start_line: chunk.start_line as i64,
                end_line: chunk.end_line as i64,
                language: chunk.language.as_str().to_string(),
                chunk_kind: chunk.kind.as_str().to_string(),
                symbol_name,
                text: chunk.text.clone(),
            });
        }
        self.vectors.upsert(&points).await?;

        let (symbols, refs, edges) = if language.supports_analysis() {
            self.analyze_file(relative_path, &text).await?
        } else {
            (Vec::new(), Vec::new(), Vec::new())
        };
        self.snapshot
            .replace_analysis(
                &self.workspace_id,
                &self.revision,
                relative_path,
                &symbols,
                &refs,
                &edges,
            )
            .await?;

        let record = FileRecord {
            workspace_id: self.workspace_id.clone(),
            revision: self.revision.clone(),
            path: relative_path.to_string(),
            digest,
            mtime,
            size,
            language: language.as_str().to_string(),
        };
        self.snapshot.replace_chunks_and_file(&record, &fts_rows).await?;
        Ok(true)
    }

    async fn analyze_file(
        &self,
        relative_path: &str,
        text: &str,
    ) -> Result<(Vec<SymbolRecord>, Vec<RefRecord>, Vec<CallEdgeRecord>)> {
        let analysis = analyze_python(text);

        let symbols: Vec<SymbolRecord> = analysis
            .definitions
            .iter()
            .map(|def| SymbolRecord {
                id: symbol_id(
                    &self.workspace_id,
                    &self.revision,
                    relative_path,
                    &def.qualname,
                    def.kind.as_str(),
                    def.start_line,
                    def.end_line,
                ),
                workspace_id: self.workspace_id.clone(),
                revision: self.revision.clone(),
                path: relative_path.to_string(),
                name: def.name.clone(),
                qualname: def.qualname.clone(),
                kind: def.kind.as_str().to_string(),
                start_line: def.start_line as i64,
                end_line: def.end_line as i64,
            })
            .collect();

        let refs = analysis
            .references
            .iter()
            .map(|r| RefRecord {
                workspace_id: self.workspace_id.clone(),
                revision: self.revision.clone(),
                path: relative_path.to_string(),
                name: r.name.clone(),
                line: r.line as i64,
                col: r.col as i64,
                context: r.context.clone(),
            })
            .collect();

        let mut edges = Vec::with_capacity(analysis.calls.len());
        for call in &analysis.calls {
            let Some(caller) = symbols.iter().find(|s| s.qualname == call.caller_qualname)
            else {
                continue;
            };
            let callee_leaf = call.callee.rsplit('.').next().unwrap_or(&call.callee);
            let callee_id = self
                .resolve_callee(relative_path, callee_leaf, &symbols)
                .await?;
            edges.push(CallEdgeRecord {
                workspace_id: self.workspace_id.clone(),
                revision: self.revision.clone(),
                caller_id: caller.id.clone(),
                callee_name: call.callee.clone(),
                callee_id,
                path: relative_path.to_string(),
                line: call.line as i64,
            });
        }

        Ok((symbols, refs, edges))
    }

    /// Name-based best-effort resolution: same-file unique match first,
    /// then workspace-wide unique match; anything else stays unresolved.
    /// The current file's symbols are taken from the fresh analysis since
    /// its stored rows are mid-replacement.
    async fn resolve_callee(
        &self,
        relative_path: &str,
        name: &str,
        local_symbols: &[SymbolRecord],
    ) -> Result<Option<String>> {
        let local: Vec<&SymbolRecord> =
            local_symbols.iter().filter(|s| s.name == name).collect();
        if local.len() == 1 {
            return Ok(Some(local[0].id.clone()));
        }

        let stored = self
            .snapshot
            .symbols_named(&self.workspace_id, &self.revision, name, None)
            .await?;
        let remote: Vec<&SymbolRecord> = stored
            .iter()
            .filter(|s| s.path != relative_path)
            .collect();
        if local.is_empty() && remote.len() == 1 {
            Ok(Some(remote[0].id.clone()))
        } else {
            Ok(None)
        }
    }
}

fn report(progress: &Option<ProgressFn>, processed: usize, total: usize, message: String) {
    if let Some(callback) = progress {
        let fraction = if total == 0 {
            1.0
        } else {
            processed as f64 / total as f64
        };
        callback(IndexProgress {
            fraction,
            processed,
            total,
            message,
        });
    }
}

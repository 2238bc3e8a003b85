//! codescout-retriever: revision-aware code search and indexing
//!
//! Given a source tree, this crate builds a searchable snapshot: a lexical
//! FTS index and a vector index kept consistent per (workspace, revision),
//! plus best-effort Python structural analysis (symbols, references, call
//! edges). Retrieval fuses lexical and semantic signals and can walk the
//! call graph.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use codescout_retriever::retrieval::{
//!     indexing_engine::{FileSelection, IndexingEngine, IndexingEngineConfig},
//!     snapshot_index::SnapshotIndex,
//!     vector_index::SqliteVectorIndex,
//! };
//! use codescout_embed::HashEmbedProvider;
//! use std::{path::PathBuf, sync::Arc};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let snapshot = SnapshotIndex::open_memory().await?;
//! let vectors = Arc::new(SqliteVectorIndex::new(snapshot.pool().clone()).await?);
//! let engine = IndexingEngine::new(
//!     IndexingEngineConfig::new(PathBuf::from(".")),
//!     snapshot,
//!     vectors,
//!     Arc::new(HashEmbedProvider::default()),
//! )
//! .await?;
//! let summary = engine.run(FileSelection::FullDiscovery, None).await?;
//! println!("{} of {} files changed", summary.files_changed, summary.files_total);
//! # Ok(())
//! # }
//! ```

pub mod retrieval;

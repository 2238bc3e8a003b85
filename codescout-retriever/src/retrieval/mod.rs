//! Indexing and retrieval over a workspace snapshot.
//!
//! - [`discovery`]: ignore-aware file walking
//! - [`identity`]: content-addressed ids and revision detection
//! - [`paths`]: workspace path boundary validation
//! - [`snapshot_index`]: revision-keyed SQLite storage (manifest, FTS5
//!   lexical rows, symbols, references, call edges, jobs)
//! - [`vector_index`]: the vector store seam and its SQLite default
//! - [`indexing_engine`]: the per-file pipeline
//! - [`search_engine`]: lexical/semantic/hybrid retrieval and call graphs
//! - [`rerank`]: optional rerank pass
//! - [`job_scheduler`]: single-slot background indexing

pub mod discovery;
pub mod identity;
pub mod indexing_engine;
pub mod job_scheduler;
pub mod paths;
pub mod rerank;
pub mod search_engine;
pub mod snapshot_index;
pub mod vector_index;

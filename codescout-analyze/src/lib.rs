//! Language detection, code-aware chunking, and Python structural analysis.
//!
//! This crate is pure computation: text in, chunks and symbol tables out.
//! Persistence and retrieval live in `codescout-retriever`.

mod analyzer;
mod chunker;
mod language;

pub use analyzer::{CallSite, FileAnalysis, NameRef, SymbolDef, SymbolKind, analyze_python};
pub use chunker::{Chunk, ChunkKind, ChunkerConfig, chunk_file};
pub use language::Language;

/// Parse Python source with tree-sitter. `None` means the parser could not
/// be constructed or ran out of budget, not that the source has errors.
pub(crate) fn parse_python(text: &str) -> Option<tree_sitter::Tree> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .ok()?;
    parser.parse(text, None)
}

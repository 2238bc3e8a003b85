//! Text embedding providers for code search.
//!
//! The [`EmbeddingProvider`] trait is the seam the indexing and retrieval
//! pipelines depend on; swapping in a model-backed provider is a matter of
//! implementing it. The in-tree [`HashEmbedProvider`] is a deterministic
//! feature-hashing implementation: fully local, reproducible, and good
//! enough for lexical-overlap similarity. Embeddings are half-precision
//! (f16) to keep stored vectors small.

pub mod error;
pub mod provider;

pub use error::{EmbedError, Result};
pub use provider::{EmbeddingProvider, EmbeddingResult, HashEmbedProvider};

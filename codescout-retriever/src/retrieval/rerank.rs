//! Optional reranking pass over fused candidates.
//!
//! Reranking is a capability, not a requirement: when no reranker is
//! available every candidate scores 0.0 and the fused order stands. A
//! cross-encoder implementation slots in behind [`Reranker`] without
//! touching the search engine.

use anyhow::Result;
use async_trait::async_trait;

/// Maximum passage length fed to a reranker.
pub const RERANK_PASSAGE_CHARS: usize = 2000;

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Whether this reranker can actually score passages.
    fn available(&self) -> bool;

    /// Score each passage against the query; one score per passage, in
    /// order. Must not fail the search: degrade to zeros instead.
    async fn rerank(&self, query: &str, passages: &[String]) -> Result<Vec<f32>>;
}

/// The always-available no-op reranker: all zeros, order preserved.
#[derive(Debug, Clone, Default)]
pub struct NoopReranker;

#[async_trait]
impl Reranker for NoopReranker {
    fn available(&self) -> bool {
        false
    }

    async fn rerank(&self, _query: &str, passages: &[String]) -> Result<Vec<f32>> {
        Ok(vec![0.0; passages.len()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_scores_everything_zero() {
        let reranker = NoopReranker;
        assert!(!reranker.available());
        let scores = reranker
            .rerank("query", &["one".into(), "two".into()])
            .await
            .unwrap();
        assert_eq!(scores, vec![0.0, 0.0]);
    }
}

//! Retrieval: lexical, semantic, and hybrid search, symbol and reference
//! lookup, and call-graph traversal.
//!
//! Fusion merges lexical and semantic candidates by location key
//! (revision, path, start, end), clamps both component scores to [0, 1],
//! and ranks by `alpha * semantic + (1 - alpha) * lexical`. Reranking is a
//! strictly optional second pass: with no reranker available every
//! candidate scores 0.0 and the fused order stands.

use anyhow::Result;
use codescout_embed::EmbeddingProvider;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

use super::rerank::{RERANK_PASSAGE_CHARS, Reranker};
use super::snapshot_index::{
    RefRecord, SearchFilters, SnapshotIndex, SymbolRecord,
};
use super::vector_index::VectorIndex;

/// Overfetch sizing for candidate collection before fusion trims.
fn overfetch(top_k: usize) -> usize {
    (top_k * 6).min(60).max(top_k)
}

/// How many fused candidates survive into the rerank stage.
const RERANK_CANDIDATE_FACTOR: usize = 5;

/// Per-hop fan-out cap for call-graph expansion.
pub const DEFAULT_GRAPH_FANOUT: usize = 50;

/// Component scores behind a fused hit.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ScoreBreakdown {
    pub semantic: f32,
    pub lexical: f32,
    pub hybrid: f32,
    pub rerank: f32,
}

/// One retrieval result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub revision: String,
    pub path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub language: String,
    pub chunk_kind: String,
    pub symbol_name: String,
    pub text: String,
    pub score: f32,
    pub scores: ScoreBreakdown,
}

/// Traversal direction for the call graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphDirection {
    Out,
    In,
    Both,
}

/// A node in a call-graph result; `missing` marks endpoints whose symbol
/// record no longer exists.
#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    pub qualname: String,
    pub kind: String,
    pub path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub missing: bool,
}

impl GraphNode {
    fn from_symbol(symbol: &SymbolRecord) -> Self {
        Self {
            id: symbol.id.clone(),
            name: symbol.name.clone(),
            qualname: symbol.qualname.clone(),
            kind: symbol.kind.clone(),
            path: symbol.path.clone(),
            start_line: symbol.start_line,
            end_line: symbol.end_line,
            missing: false,
        }
    }

    fn placeholder(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: String::new(),
            qualname: String::new(),
            kind: String::new(),
            path: String::new(),
            start_line: 0,
            end_line: 0,
            missing: true,
        }
    }
}

/// An edge traversed during call-graph expansion. `to` is a symbol id when
/// the edge was resolved, otherwise the recorded callee name.
#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub resolved: bool,
    pub line: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Read-only retrieval over one workspace snapshot.
pub struct SearchEngine {
    workspace_id: String,
    revision: String,
    snapshot: SnapshotIndex,
    vectors: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Arc<dyn Reranker>,
}

impl SearchEngine {
    pub fn new(
        workspace_id: String,
        revision: String,
        snapshot: SnapshotIndex,
        vectors: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        reranker: Arc<dyn Reranker>,
    ) -> Self {
        Self {
            workspace_id,
            revision,
            snapshot,
            vectors,
            embedder,
            reranker,
        }
    }

    /// BM25 search over the lexical index.
    pub async fn lexical(
        &self,
        query: &str,
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        let filters = self.scoped(filters);
        let hits = self
            .snapshot
            .lexical_search(&self.workspace_id, query, &filters, top_k)
            .await?;
        Ok(hits
            .into_iter()
            .map(|hit| {
                let score = hit.score;
                SearchHit {
                    revision: hit.revision,
                    path: hit.path,
                    start_line: hit.start_line,
                    end_line: hit.end_line,
                    language: hit.language,
                    chunk_kind: hit.chunk_kind,
                    symbol_name: hit.symbol_name,
                    text: hit.text,
                    score,
                    scores: ScoreBreakdown {
                        lexical: score,
                        hybrid: score,
                        ..Default::default()
                    },
                }
            })
            .collect())
    }

    /// Nearest-neighbor search over chunk embeddings.
    pub async fn semantic(
        &self,
        query: &str,
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        let mut hits = self.semantic_candidates(query, filters, top_k).await?;
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Fused lexical + semantic search with optional reranking.
    pub async fn hybrid(
        &self,
        query: &str,
        filters: &SearchFilters,
        top_k: usize,
        alpha: f32,
        rerank: bool,
    ) -> Result<Vec<SearchHit>> {
        let semantic = self.semantic_candidates(query, filters, top_k).await?;
        let lexical = self.lexical(query, filters, overfetch(top_k)).await?;

        let mut fused = fuse_candidates(semantic, lexical, alpha);
        fused.truncate(top_k * RERANK_CANDIDATE_FACTOR);

        if rerank && self.reranker.available() {
            let passages: Vec<String> = fused
                .iter()
                .map(|hit| truncate_chars(&hit.text, RERANK_PASSAGE_CHARS))
                .collect();
            let scores = self.reranker.rerank(query, &passages).await?;
            for (hit, score) in fused.iter_mut().zip(scores) {
                hit.scores.rerank = score;
                hit.score = score;
            }
            fused.sort_by(|a, b| {
                (b.scores.rerank, b.scores.hybrid)
                    .partial_cmp(&(a.scores.rerank, a.scores.hybrid))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        fused.truncate(top_k);
        Ok(fused)
    }

    /// Substring symbol lookup, ordered by (path, start line).
    pub async fn find_symbols(
        &self,
        name_fragment: &str,
        path_prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SymbolRecord>> {
        self.snapshot
            .find_symbols(
                &self.workspace_id,
                &self.revision,
                name_fragment,
                path_prefix,
                limit,
            )
            .await
    }

    /// Exact-name reference lookup, ordered by (path, line).
    pub async fn find_references(
        &self,
        name: &str,
        path_prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RefRecord>> {
        self.snapshot
            .find_references(&self.workspace_id, &self.revision, name, path_prefix, limit)
            .await
    }

    /// Breadth-first call-graph neighborhood around a symbol.
    pub async fn call_graph(
        &self,
        start_symbol_id: &str,
        depth: usize,
        direction: GraphDirection,
        fanout: usize,
    ) -> Result<CallGraph> {
        let mut nodes: Vec<GraphNode> = Vec::new();
        let mut edges: Vec<GraphEdge> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();

        let start = match self.snapshot.get_symbol(start_symbol_id).await? {
            Some(symbol) => GraphNode::from_symbol(&symbol),
            None => GraphNode::placeholder(start_symbol_id),
        };
        visited.insert(start.id.clone());
        let mut frontier: VecDeque<String> = VecDeque::from([start.id.clone()]);
        nodes.push(start);

        for _hop in 0..depth {
            if frontier.is_empty() {
                break;
            }
            let mut next_frontier: VecDeque<String> = VecDeque::new();
            while let Some(node_id) = frontier.pop_front() {
                if matches!(direction, GraphDirection::Out | GraphDirection::Both) {
                    let outgoing = self
                        .snapshot
                        .edges_from(&self.workspace_id, &self.revision, &node_id, fanout)
                        .await?;
                    for edge in outgoing {
                        edges.push(GraphEdge {
                            from: edge.caller_id.clone(),
                            to: edge
                                .callee_id
                                .clone()
                                .unwrap_or_else(|| edge.callee_name.clone()),
                            resolved: edge.callee_id.is_some(),
                            line: edge.line,
                        });
                        if let Some(callee_id) = edge.callee_id {
                            self.admit_node(&callee_id, &mut visited, &mut nodes, &mut next_frontier)
                                .await?;
                        }
                    }
                }
                if matches!(direction, GraphDirection::In | GraphDirection::Both) {
                    let incoming = self
                        .snapshot
                        .edges_to(&self.workspace_id, &self.revision, &node_id, fanout)
                        .await?;
                    for edge in incoming {
                        edges.push(GraphEdge {
                            from: edge.caller_id.clone(),
                            to: node_id.clone(),
                            resolved: true,
                            line: edge.line,
                        });
                        self.admit_node(
                            &edge.caller_id,
                            &mut visited,
                            &mut nodes,
                            &mut next_frontier,
                        )
                        .await?;
                    }
                }
            }
            frontier = next_frontier;
        }

        debug!(
            "Call graph from {}: {} nodes, {} edges",
            start_symbol_id,
            nodes.len(),
            edges.len()
        );
        Ok(CallGraph { nodes, edges })
    }

    async fn admit_node(
        &self,
        symbol_id: &str,
        visited: &mut HashSet<String>,
        nodes: &mut Vec<GraphNode>,
        next_frontier: &mut VecDeque<String>,
    ) -> Result<()> {
        if !visited.insert(symbol_id.to_string()) {
            return Ok(());
        }
        let node = match self.snapshot.get_symbol(symbol_id).await? {
            Some(symbol) => GraphNode::from_symbol(&symbol),
            None => GraphNode::placeholder(symbol_id),
        };
        nodes.push(node);
        next_frontier.push_back(symbol_id.to_string());
        Ok(())
    }

    async fn semantic_candidates(
        &self,
        query: &str,
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        let filters = self.scoped(filters);
        let embedding = self.embedder.embed_text(query).await?;
        let points = self
            .vectors
            .query(&self.workspace_id, &embedding, &filters, overfetch(top_k))
            .await?;
        Ok(points
            .into_iter()
            .filter(|point| match &filters.path_prefix {
                Some(prefix) => point.payload.path.starts_with(prefix.as_str()),
                None => true,
            })
            .map(|point| {
                let score = point.score;
                SearchHit {
                    revision: point.payload.revision,
                    path: point.payload.path,
                    start_line: point.payload.start_line,
                    end_line: point.payload.end_line,
                    language: point.payload.language,
                    chunk_kind: point.payload.chunk_kind,
                    symbol_name: point.payload.symbol_name,
                    text: point.payload.text,
                    score,
                    scores: ScoreBreakdown {
                        semantic: score,
                        hybrid: score,
                        ..Default::default()
                    },
                }
            })
            .collect())
    }

    /// Pin the engine's revision unless the caller scoped one explicitly.
    fn scoped(&self, filters: &SearchFilters) -> SearchFilters {
        let mut filters = filters.clone();
        if filters.revision.is_none() {
            filters.revision = Some(self.revision.clone());
        }
        filters
    }
}

/// Merge semantic and lexical candidates by location key, clamp component
/// scores, and rank by the alpha blend.
fn fuse_candidates(semantic: Vec<SearchHit>, lexical: Vec<SearchHit>, alpha: f32) -> Vec<SearchHit> {
    let alpha = if alpha.is_finite() {
        alpha.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let mut merged: HashMap<(String, String, i64, i64), SearchHit> = HashMap::new();

    for hit in semantic {
        let key = (
            hit.revision.clone(),
            hit.path.clone(),
            hit.start_line,
            hit.end_line,
        );
        let semantic_score = clamp01(hit.scores.semantic);
        merged
            .entry(key)
            .and_modify(|existing| {
                existing.scores.semantic = existing.scores.semantic.max(semantic_score);
            })
            .or_insert_with(|| {
                let mut hit = hit;
                hit.scores.semantic = semantic_score;
                hit.scores.lexical = 0.0;
                hit
            });
    }
    for hit in lexical {
        let key = (
            hit.revision.clone(),
            hit.path.clone(),
            hit.start_line,
            hit.end_line,
        );
        let lexical_score = clamp01(hit.scores.lexical);
        merged
            .entry(key)
            .and_modify(|existing| {
                existing.scores.lexical = existing.scores.lexical.max(lexical_score);
            })
            .or_insert_with(|| {
                let mut hit = hit;
                hit.scores.lexical = lexical_score;
                hit.scores.semantic = 0.0;
                hit
            });
    }

    let mut fused: Vec<SearchHit> = merged
        .into_values()
        .map(|mut hit| {
            hit.scores.hybrid =
                alpha * hit.scores.semantic + (1.0 - alpha) * hit.scores.lexical;
            hit.scores.rerank = 0.0;
            hit.score = hit.scores.hybrid;
            hit
        })
        .collect();
    fused.sort_by(|a, b| b.scores.hybrid.total_cmp(&a.scores.hybrid));
    fused
}

fn clamp01(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => s[..byte_idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(path: &str, start: i64, semantic: f32, lexical: f32) -> SearchHit {
        SearchHit {
            revision: "rev".into(),
            path: path.into(),
            start_line: start,
            end_line: start + 5,
            language: "python".into(),
            chunk_kind: "function".into(),
            symbol_name: "".into(),
            text: "text".into(),
            score: 0.0,
            scores: ScoreBreakdown {
                semantic,
                lexical,
                ..Default::default()
            },
        }
    }

    #[test]
    fn fusion_merges_by_location_key() {
        let semantic = vec![hit("a.py", 1, 0.8, 0.0)];
        let lexical = vec![hit("a.py", 1, 0.0, 0.6), hit("b.py", 1, 0.0, 0.4)];

        let fused = fuse_candidates(semantic, lexical, 0.5);
        assert_eq!(fused.len(), 2);
        let a = fused.iter().find(|h| h.path == "a.py").unwrap();
        assert!((a.scores.hybrid - 0.7).abs() < 1e-6);
        assert!((a.scores.semantic - 0.8).abs() < 1e-6);
        assert!((a.scores.lexical - 0.6).abs() < 1e-6);
    }

    #[test]
    fn fusion_clamps_scores_and_alpha() {
        let semantic = vec![hit("a.py", 1, 2.5, 0.0)];
        let lexical = vec![hit("a.py", 1, 0.0, -0.5)];

        let fused = fuse_candidates(semantic, lexical, 7.0);
        assert_eq!(fused[0].scores.semantic, 1.0);
        assert_eq!(fused[0].scores.lexical, 0.0);
        // alpha clamps to 1.0, so hybrid equals the semantic score.
        assert_eq!(fused[0].scores.hybrid, 1.0);

        let nan_alpha = fuse_candidates(vec![hit("a.py", 1, 0.9, 0.0)], vec![], f32::NAN);
        assert_eq!(nan_alpha[0].scores.hybrid, 0.0);
    }

    #[test]
    fn hybrid_is_monotone_in_alpha() {
        // Semantic score exceeds lexical: raising alpha must not lower hybrid.
        let score_at = |alpha: f32| {
            fuse_candidates(
                vec![hit("a.py", 1, 0.9, 0.0)],
                vec![hit("a.py", 1, 0.0, 0.2)],
                alpha,
            )[0]
            .scores
            .hybrid
        };
        let mut previous = score_at(0.0);
        for step in 1..=10 {
            let current = score_at(step as f32 / 10.0);
            assert!(current >= previous);
            previous = current;
        }

        // Lexical dominates: hybrid is non-increasing in alpha.
        let lex_score_at = |alpha: f32| {
            fuse_candidates(
                vec![hit("a.py", 1, 0.1, 0.0)],
                vec![hit("a.py", 1, 0.0, 0.8)],
                alpha,
            )[0]
            .scores
            .hybrid
        };
        let mut previous = lex_score_at(0.0);
        for step in 1..=10 {
            let current = lex_score_at(step as f32 / 10.0);
            assert!(current <= previous);
            previous = current;
        }
    }

    #[test]
    fn overfetch_never_shrinks_below_top_k() {
        assert_eq!(overfetch(5), 30);
        assert_eq!(overfetch(10), 60);
        assert_eq!(overfetch(100), 100);
    }
}

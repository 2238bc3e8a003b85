//! Vector index seam and the default SQLite-backed implementation.
//!
//! The pipeline and the retrieval engine only see [`VectorIndex`]; a
//! server-backed ANN store can be dropped in behind it. The in-tree
//! [`SqliteVectorIndex`] stores f16 embedding blobs next to the snapshot
//! tables and scores by brute-force cosine, which is plenty for
//! workspace-sized corpora and keeps the whole system local.

use anyhow::Result;
use async_trait::async_trait;
use half::f16;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use super::snapshot_index::{SearchFilters, like_escape};

/// Metadata attached to every vector point, one per chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub workspace_id: String,
    pub revision: String,
    pub path: String,
    pub language: String,
    pub chunk_kind: String,
    pub symbol_name: String,
    pub start_line: i64,
    pub end_line: i64,
    pub text: String,
    pub text_digest: String,
    pub updated_at: String,
}

/// A point to upsert: deterministic id, payload, and the chunk embedding.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub payload: ChunkPayload,
    pub embedding: Vec<f16>,
}

/// A nearest-neighbor hit.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub payload: ChunkPayload,
    pub score: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite points by id.
    async fn upsert(&self, points: &[VectorPoint]) -> Result<()>;

    /// Remove every point stored for (workspace, revision, path).
    async fn delete_by_file(&self, workspace_id: &str, revision: &str, path: &str) -> Result<u64>;

    /// Nearest neighbors of `embedding` under the given scoping filter,
    /// best first.
    async fn query(
        &self,
        workspace_id: &str,
        embedding: &[f16],
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>>;
}

/// Brute-force cosine search over a `vector_points` table.
#[derive(Clone, Debug)]
pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    /// Wrap an existing pool (normally the snapshot index's) and create the
    /// backing table.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vector_points (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                revision TEXT NOT NULL,
                path TEXT NOT NULL,
                language TEXT NOT NULL,
                chunk_kind TEXT NOT NULL,
                symbol_name TEXT NOT NULL,
                payload TEXT NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_points_file
             ON vector_points(workspace_id, revision, path)",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for point in points {
            let payload_json = serde_json::to_string(&point.payload)?;
            let embedding_bytes = bytemuck::cast_slice::<f16, u8>(&point.embedding);
            sqlx::query(
                r#"
                INSERT INTO vector_points
                    (id, workspace_id, revision, path, language, chunk_kind, symbol_name,
                     payload, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(id) DO UPDATE SET
                    payload = excluded.payload,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&point.id)
            .bind(&point.payload.workspace_id)
            .bind(&point.payload.revision)
            .bind(&point.payload.path)
            .bind(&point.payload.language)
            .bind(&point.payload.chunk_kind)
            .bind(&point.payload.symbol_name)
            .bind(&payload_json)
            .bind(embedding_bytes)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_by_file(&self, workspace_id: &str, revision: &str, path: &str) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM vector_points WHERE workspace_id = ?1 AND revision = ?2 AND path = ?3",
        )
        .bind(workspace_id)
        .bind(revision)
        .bind(path)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn query(
        &self,
        workspace_id: &str,
        embedding: &[f16],
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let mut sql = String::from(
            "SELECT payload, embedding FROM vector_points WHERE workspace_id = ?1",
        );
        let mut binds = vec![workspace_id.to_string()];
        for (column, value) in [
            ("revision", filters.revision.as_deref()),
            ("language", filters.language.as_deref()),
            ("chunk_kind", filters.chunk_kind.as_deref()),
            ("symbol_name", filters.symbol_name.as_deref()),
        ] {
            if let Some(value) = value {
                sql.push_str(&format!(" AND {column} = ?{}", binds.len() + 1));
                binds.push(value.to_string());
            }
        }
        if let Some(prefix) = &filters.path_prefix {
            sql.push_str(&format!(" AND path LIKE ?{} ESCAPE '\\'", binds.len() + 1));
            binds.push(format!("{}%", like_escape(prefix)));
        }

        let mut query_builder = sqlx::query(&sql);
        for bind in &binds {
            query_builder = query_builder.bind(bind);
        }
        let rows = query_builder.fetch_all(&self.pool).await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            let payload_json: String = row.get("payload");
            let embedding_bytes: Vec<u8> = row.get("embedding");
            let payload: ChunkPayload = serde_json::from_str(&payload_json)?;
            let stored = bytemuck::cast_slice::<u8, f16>(&embedding_bytes);
            scored.push(ScoredPoint {
                payload,
                score: cosine_similarity(embedding, stored),
            });
        }
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }
}

fn cosine_similarity(a: &[f16], b: &[f16]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (x.to_f32(), y.to_f32());
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a.sqrt() * norm_b.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::snapshot_index::SnapshotIndex;

    fn payload(path: &str, start: i64) -> ChunkPayload {
        ChunkPayload {
            workspace_id: "ws".into(),
            revision: "rev".into(),
            path: path.into(),
            language: "python".into(),
            chunk_kind: "function".into(),
            symbol_name: "".into(),
            start_line: start,
            end_line: start + 4,
            text: "def f(): pass".into(),
            text_digest: "digest".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    fn vec_of(values: &[f32]) -> Vec<f16> {
        values.iter().copied().map(f16::from_f32).collect()
    }

    async fn open_index() -> SqliteVectorIndex {
        let snapshot = SnapshotIndex::open_memory().await.unwrap();
        SqliteVectorIndex::new(snapshot.pool().clone()).await.unwrap()
    }

    #[tokio::test]
    async fn query_ranks_by_cosine() {
        let index = open_index().await;
        index
            .upsert(&[
                VectorPoint {
                    id: "p1".into(),
                    payload: payload("a.py", 1),
                    embedding: vec_of(&[1.0, 0.0, 0.0]),
                },
                VectorPoint {
                    id: "p2".into(),
                    payload: payload("b.py", 1),
                    embedding: vec_of(&[0.0, 1.0, 0.0]),
                },
            ])
            .await
            .unwrap();

        let hits = index
            .query("ws", &vec_of(&[0.9, 0.1, 0.0]), &SearchFilters::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload.path, "a.py");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn upsert_same_id_does_not_duplicate() {
        let index = open_index().await;
        let point = VectorPoint {
            id: "p1".into(),
            payload: payload("a.py", 1),
            embedding: vec_of(&[1.0, 0.0]),
        };
        index.upsert(std::slice::from_ref(&point)).await.unwrap();
        index.upsert(&[point]).await.unwrap();

        let hits = index
            .query("ws", &vec_of(&[1.0, 0.0]), &SearchFilters::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn delete_by_file_is_scoped() {
        let index = open_index().await;
        index
            .upsert(&[
                VectorPoint {
                    id: "p1".into(),
                    payload: payload("a.py", 1),
                    embedding: vec_of(&[1.0, 0.0]),
                },
                VectorPoint {
                    id: "p2".into(),
                    payload: payload("b.py", 1),
                    embedding: vec_of(&[0.0, 1.0]),
                },
            ])
            .await
            .unwrap();

        let deleted = index.delete_by_file("ws", "rev", "a.py").await.unwrap();
        assert_eq!(deleted, 1);

        let hits = index
            .query("ws", &vec_of(&[1.0, 1.0]), &SearchFilters::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.path, "b.py");
    }

    #[tokio::test]
    async fn path_prefix_filter_trims_results() {
        let index = open_index().await;
        index
            .upsert(&[
                VectorPoint {
                    id: "p1".into(),
                    payload: payload("src/a.py", 1),
                    embedding: vec_of(&[1.0, 0.0]),
                },
                VectorPoint {
                    id: "p2".into(),
                    payload: payload("tests/t.py", 1),
                    embedding: vec_of(&[1.0, 0.0]),
                },
            ])
            .await
            .unwrap();

        let filters = SearchFilters {
            path_prefix: Some("src/".into()),
            ..Default::default()
        };
        let hits = index
            .query("ws", &vec_of(&[1.0, 0.0]), &filters, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.path, "src/a.py");
    }
}

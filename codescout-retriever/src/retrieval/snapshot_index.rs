//! Revision-keyed SQLite storage for the code index.
//!
//! This is the durable record of workspaces, snapshots, per-revision file
//! manifests, lexical chunk rows (FTS5), symbols, references, call edges,
//! and job records.
//!
//! ## Schema highlights
//!
//! - `files` keys on (workspace_id, revision, path) and stores the change
//!   detection triple: content digest, mtime, size.
//! - `chunk_fts` is an FTS5 virtual table; only `text` is tokenized, the
//!   filter columns ride along UNINDEXED. Lexical ranking uses `bm25()`.
//! - `symbols.id` is a deterministic content hash, so unchanged code keeps
//!   its ids across runs.
//! - Snapshots are independent: every statement filters on
//!   (workspace_id, revision), so revision B never touches revision A.
//!
//! ## SQLite configuration
//!
//! WAL journal, normal synchronous, busy timeout, auto-vacuum; in-memory
//! pools for tests via [`SnapshotIndex::open_memory`].

use anyhow::Result;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;

/// Per-(workspace, revision, path) manifest entry; the change-detection key.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub workspace_id: String,
    pub revision: String,
    pub path: String,
    pub digest: String,
    pub mtime: f64,
    pub size: i64,
    pub language: String,
}

/// A stored symbol definition.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolRecord {
    pub id: String,
    pub workspace_id: String,
    pub revision: String,
    pub path: String,
    pub name: String,
    pub qualname: String,
    pub kind: String,
    pub start_line: i64,
    pub end_line: i64,
}

/// A stored name-use occurrence. Not resolved to a symbol.
#[derive(Debug, Clone)]
pub struct RefRecord {
    pub workspace_id: String,
    pub revision: String,
    pub path: String,
    pub name: String,
    pub line: i64,
    pub col: i64,
    pub context: String,
}

/// A caller→callee edge; `callee_id` stays NULL when resolution failed or
/// was ambiguous.
#[derive(Debug, Clone)]
pub struct CallEdgeRecord {
    pub workspace_id: String,
    pub revision: String,
    pub caller_id: String,
    pub callee_name: String,
    pub callee_id: Option<String>,
    pub path: String,
    pub line: i64,
}

/// One lexical-index row, mirrored into `chunk_fts`.
#[derive(Debug, Clone)]
pub struct ChunkFtsRow {
    pub workspace_id: String,
    pub revision: String,
    pub path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub language: String,
    pub chunk_kind: String,
    pub symbol_name: String,
    pub text: String,
}

/// Optional scoping shared by lexical, semantic, symbol, and reference
/// queries.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub revision: Option<String>,
    pub language: Option<String>,
    pub chunk_kind: Option<String>,
    pub symbol_name: Option<String>,
    pub path_prefix: Option<String>,
}

/// A lexical hit with its normalized higher-is-better score.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub revision: String,
    pub path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub language: String,
    pub chunk_kind: String,
    pub symbol_name: String,
    pub text: String,
    pub score: f32,
}

/// Job lifecycle states (create → running → finished|failed).
pub mod job_state {
    pub const QUEUED: &str = "queued";
    pub const RUNNING: &str = "running";
    pub const FINISHED: &str = "finished";
    pub const FAILED: &str = "failed";
}

/// A stored indexing job record.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: i64,
    pub workspace_id: String,
    pub state: String,
    pub progress: f64,
    pub processed: i64,
    pub total: i64,
    pub message: String,
    pub error: Option<String>,
    pub result: Option<String>,
}

/// SQLite-backed snapshot store.
#[derive(Clone, Debug)]
pub struct SnapshotIndex {
    pool: SqlitePool,
}

impl SnapshotIndex {
    /// Opens the index with persistent SQLite storage under `data_dir`.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("codescout.db");

        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
                .create_if_missing(true)
                .auto_vacuum(sqlx::sqlite::SqliteAutoVacuum::Full),
        )
        .await?;
        Self::new_with_pool(pool).await
    }

    /// Opens the index with in-memory SQLite storage for testing.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        Self::new_with_pool(pool).await
    }

    async fn new_with_pool(pool: SqlitePool) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workspaces (
                id TEXT PRIMARY KEY,
                root_path TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                workspace_id TEXT NOT NULL,
                revision TEXT NOT NULL,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (workspace_id, revision)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                workspace_id TEXT NOT NULL,
                revision TEXT NOT NULL,
                path TEXT NOT NULL,
                digest TEXT NOT NULL,
                mtime REAL NOT NULL,
                size INTEGER NOT NULL,
                language TEXT NOT NULL,
                indexed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (workspace_id, revision, path)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS symbols (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                revision TEXT NOT NULL,
                path TEXT NOT NULL,
                name TEXT NOT NULL,
                qualname TEXT NOT NULL,
                kind TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS refs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workspace_id TEXT NOT NULL,
                revision TEXT NOT NULL,
                path TEXT NOT NULL,
                name TEXT NOT NULL,
                line INTEGER NOT NULL,
                col INTEGER NOT NULL,
                context TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS call_edges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workspace_id TEXT NOT NULL,
                revision TEXT NOT NULL,
                caller_id TEXT NOT NULL,
                callee_name TEXT NOT NULL,
                callee_id TEXT,
                path TEXT NOT NULL,
                line INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workspace_id TEXT NOT NULL,
                state TEXT NOT NULL,
                progress REAL NOT NULL DEFAULT 0.0,
                processed INTEGER NOT NULL DEFAULT 0,
                total INTEGER NOT NULL DEFAULT 0,
                message TEXT NOT NULL DEFAULT '',
                error TEXT,
                result TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS chunk_fts USING fts5(
                text,
                workspace_id UNINDEXED,
                revision UNINDEXED,
                path UNINDEXED,
                start_line UNINDEXED,
                end_line UNINDEXED,
                language UNINDEXED,
                chunk_kind UNINDEXED,
                symbol_name UNINDEXED,
                tokenize='unicode61'
            )
            "#,
        )
        .execute(pool)
        .await?;

        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(workspace_id, revision, name)",
            "CREATE INDEX IF NOT EXISTS idx_symbols_path ON symbols(workspace_id, revision, path)",
            "CREATE INDEX IF NOT EXISTS idx_refs_name ON refs(workspace_id, revision, name)",
            "CREATE INDEX IF NOT EXISTS idx_edges_caller ON call_edges(workspace_id, revision, caller_id)",
            "CREATE INDEX IF NOT EXISTS idx_edges_callee ON call_edges(workspace_id, revision, callee_id)",
            "CREATE INDEX IF NOT EXISTS idx_edges_path ON call_edges(workspace_id, revision, path)",
        ] {
            sqlx::query(stmt).execute(pool).await?;
        }

        Ok(())
    }

    /// Register the workspace if it is new; existing rows are untouched.
    pub async fn ensure_workspace(&self, workspace_id: &str, root_path: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO workspaces (id, root_path) VALUES (?1, ?2)")
            .bind(workspace_id)
            .bind(root_path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Create the snapshot row, or refresh its timestamp.
    pub async fn touch_snapshot(&self, workspace_id: &str, revision: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (workspace_id, revision, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(workspace_id, revision) DO UPDATE SET updated_at = datetime('now')
            "#,
        )
        .bind(workspace_id)
        .bind(revision)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_file_record(
        &self,
        workspace_id: &str,
        revision: &str,
        path: &str,
    ) -> Result<Option<FileRecord>> {
        let row = sqlx::query(
            "SELECT digest, mtime, size, language FROM files
             WHERE workspace_id = ?1 AND revision = ?2 AND path = ?3",
        )
        .bind(workspace_id)
        .bind(revision)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| FileRecord {
            workspace_id: workspace_id.to_string(),
            revision: revision.to_string(),
            path: path.to_string(),
            digest: row.get("digest"),
            mtime: row.get("mtime"),
            size: row.get("size"),
            language: row.get("language"),
        }))
    }

    /// Replace a file's lexical rows and its manifest entry in one
    /// transaction, so readers never see rows from two content versions.
    pub async fn replace_chunks_and_file(
        &self,
        record: &FileRecord,
        rows: &[ChunkFtsRow],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunk_fts WHERE workspace_id = ?1 AND revision = ?2 AND path = ?3")
            .bind(&record.workspace_id)
            .bind(&record.revision)
            .bind(&record.path)
            .execute(&mut *tx)
            .await?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO chunk_fts
                    (text, workspace_id, revision, path, start_line, end_line,
                     language, chunk_kind, symbol_name)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(&row.text)
            .bind(&row.workspace_id)
            .bind(&row.revision)
            .bind(&row.path)
            .bind(row.start_line)
            .bind(row.end_line)
            .bind(&row.language)
            .bind(&row.chunk_kind)
            .bind(&row.symbol_name)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO files (workspace_id, revision, path, digest, mtime, size, language, indexed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))
            ON CONFLICT(workspace_id, revision, path) DO UPDATE SET
                digest = excluded.digest,
                mtime = excluded.mtime,
                size = excluded.size,
                language = excluded.language,
                indexed_at = datetime('now')
            "#,
        )
        .bind(&record.workspace_id)
        .bind(&record.revision)
        .bind(&record.path)
        .bind(&record.digest)
        .bind(record.mtime)
        .bind(record.size)
        .bind(&record.language)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Replace a file's symbols, references, and outgoing call edges in one
    /// transaction.
    pub async fn replace_analysis(
        &self,
        workspace_id: &str,
        revision: &str,
        path: &str,
        symbols: &[SymbolRecord],
        refs: &[RefRecord],
        edges: &[CallEdgeRecord],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for table in ["symbols", "refs", "call_edges"] {
            let stmt =
                format!("DELETE FROM {table} WHERE workspace_id = ?1 AND revision = ?2 AND path = ?3");
            sqlx::query(&stmt)
                .bind(workspace_id)
                .bind(revision)
                .bind(path)
                .execute(&mut *tx)
                .await?;
        }

        for symbol in symbols {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO symbols
                    (id, workspace_id, revision, path, name, qualname, kind, start_line, end_line)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(&symbol.id)
            .bind(&symbol.workspace_id)
            .bind(&symbol.revision)
            .bind(&symbol.path)
            .bind(&symbol.name)
            .bind(&symbol.qualname)
            .bind(&symbol.kind)
            .bind(symbol.start_line)
            .bind(symbol.end_line)
            .execute(&mut *tx)
            .await?;
        }

        for reference in refs {
            sqlx::query(
                r#"
                INSERT INTO refs (workspace_id, revision, path, name, line, col, context)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&reference.workspace_id)
            .bind(&reference.revision)
            .bind(&reference.path)
            .bind(&reference.name)
            .bind(reference.line)
            .bind(reference.col)
            .bind(&reference.context)
            .execute(&mut *tx)
            .await?;
        }

        for edge in edges {
            sqlx::query(
                r#"
                INSERT INTO call_edges
                    (workspace_id, revision, caller_id, callee_name, callee_id, path, line)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&edge.workspace_id)
            .bind(&edge.revision)
            .bind(&edge.caller_id)
            .bind(&edge.callee_name)
            .bind(&edge.callee_id)
            .bind(&edge.path)
            .bind(edge.line)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// BM25-ranked lexical search. The raw rank cost is normalized to a
    /// higher-is-better score via `1 / (1 + max(0, cost))`.
    pub async fn lexical_search(
        &self,
        workspace_id: &str,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<LexicalHit>> {
        let match_expr = fts_match_expression(query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = String::from(
            "SELECT revision, path, start_line, end_line, language, chunk_kind, symbol_name, text,
                    bm25(chunk_fts) AS cost
             FROM chunk_fts
             WHERE chunk_fts MATCH ?1 AND workspace_id = ?2",
        );
        let mut binds: Vec<String> = vec![match_expr, workspace_id.to_string()];
        push_filter(&mut sql, &mut binds, "revision", filters.revision.as_deref());
        push_filter(&mut sql, &mut binds, "language", filters.language.as_deref());
        push_filter(&mut sql, &mut binds, "chunk_kind", filters.chunk_kind.as_deref());
        push_filter(&mut sql, &mut binds, "symbol_name", filters.symbol_name.as_deref());
        if let Some(prefix) = &filters.path_prefix {
            sql.push_str(&format!(" AND path LIKE ?{} ESCAPE '\\'", binds.len() + 1));
            binds.push(format!("{}%", like_escape(prefix)));
        }
        sql.push_str(&format!(" ORDER BY cost LIMIT {limit}"));

        let mut query_builder = sqlx::query(&sql);
        for bind in &binds {
            query_builder = query_builder.bind(bind);
        }
        let rows = query_builder.fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let cost: f64 = row.get("cost");
                LexicalHit {
                    revision: row.get("revision"),
                    path: row.get("path"),
                    start_line: parse_line(&row, "start_line"),
                    end_line: parse_line(&row, "end_line"),
                    language: row.get("language"),
                    chunk_kind: row.get("chunk_kind"),
                    symbol_name: row.get("symbol_name"),
                    text: row.get("text"),
                    score: (1.0 / (1.0 + cost.max(0.0))) as f32,
                }
            })
            .collect())
    }

    /// Substring match over symbol names, ordered by (path, start line).
    pub async fn find_symbols(
        &self,
        workspace_id: &str,
        revision: &str,
        name_fragment: &str,
        path_prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SymbolRecord>> {
        let mut sql = String::from(
            "SELECT id, path, name, qualname, kind, start_line, end_line FROM symbols
             WHERE workspace_id = ?1 AND revision = ?2 AND name LIKE ?3 ESCAPE '\\'",
        );
        let mut binds = vec![
            workspace_id.to_string(),
            revision.to_string(),
            format!("%{}%", like_escape(name_fragment)),
        ];
        if let Some(prefix) = path_prefix {
            sql.push_str(&format!(" AND path LIKE ?{} ESCAPE '\\'", binds.len() + 1));
            binds.push(format!("{}%", like_escape(prefix)));
        }
        sql.push_str(&format!(" ORDER BY path, start_line LIMIT {limit}"));

        let mut query_builder = sqlx::query(&sql);
        for bind in &binds {
            query_builder = query_builder.bind(bind);
        }
        let rows = query_builder.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| self.symbol_from_row(workspace_id, revision, &row))
            .collect())
    }

    /// Exact-name match over references, ordered by (path, line).
    pub async fn find_references(
        &self,
        workspace_id: &str,
        revision: &str,
        name: &str,
        path_prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RefRecord>> {
        let mut sql = String::from(
            "SELECT path, name, line, col, context FROM refs
             WHERE workspace_id = ?1 AND revision = ?2 AND name = ?3",
        );
        let mut binds = vec![
            workspace_id.to_string(),
            revision.to_string(),
            name.to_string(),
        ];
        if let Some(prefix) = path_prefix {
            sql.push_str(&format!(" AND path LIKE ?{} ESCAPE '\\'", binds.len() + 1));
            binds.push(format!("{}%", like_escape(prefix)));
        }
        sql.push_str(&format!(" ORDER BY path, line LIMIT {limit}"));

        let mut query_builder = sqlx::query(&sql);
        for bind in &binds {
            query_builder = query_builder.bind(bind);
        }
        let rows = query_builder.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| RefRecord {
                workspace_id: workspace_id.to_string(),
                revision: revision.to_string(),
                path: row.get("path"),
                name: row.get("name"),
                line: row.get("line"),
                col: row.get("col"),
                context: row.get("context"),
            })
            .collect())
    }

    /// Exact-name symbol lookup, optionally restricted to one file. Used by
    /// call-edge resolution.
    pub async fn symbols_named(
        &self,
        workspace_id: &str,
        revision: &str,
        name: &str,
        path: Option<&str>,
    ) -> Result<Vec<SymbolRecord>> {
        let mut sql = String::from(
            "SELECT id, path, name, qualname, kind, start_line, end_line FROM symbols
             WHERE workspace_id = ?1 AND revision = ?2 AND name = ?3",
        );
        let mut binds = vec![
            workspace_id.to_string(),
            revision.to_string(),
            name.to_string(),
        ];
        if let Some(path) = path {
            sql.push_str(&format!(" AND path = ?{}", binds.len() + 1));
            binds.push(path.to_string());
        }

        let mut query_builder = sqlx::query(&sql);
        for bind in &binds {
            query_builder = query_builder.bind(bind);
        }
        let rows = query_builder.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| self.symbol_from_row(workspace_id, revision, &row))
            .collect())
    }

    pub async fn get_symbol(&self, symbol_id: &str) -> Result<Option<SymbolRecord>> {
        let row = sqlx::query(
            "SELECT workspace_id, revision, path, name, qualname, kind, start_line, end_line
             FROM symbols WHERE id = ?1",
        )
        .bind(symbol_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| SymbolRecord {
            id: symbol_id.to_string(),
            workspace_id: row.get("workspace_id"),
            revision: row.get("revision"),
            path: row.get("path"),
            name: row.get("name"),
            qualname: row.get("qualname"),
            kind: row.get("kind"),
            start_line: row.get("start_line"),
            end_line: row.get("end_line"),
        }))
    }

    /// Outgoing edges for a caller symbol.
    pub async fn edges_from(
        &self,
        workspace_id: &str,
        revision: &str,
        caller_id: &str,
        limit: usize,
    ) -> Result<Vec<CallEdgeRecord>> {
        let rows = sqlx::query(
            "SELECT caller_id, callee_name, callee_id, path, line FROM call_edges
             WHERE workspace_id = ?1 AND revision = ?2 AND caller_id = ?3
             ORDER BY line LIMIT ?4",
        )
        .bind(workspace_id)
        .bind(revision)
        .bind(caller_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| self.edge_from_row(workspace_id, revision, &row))
            .collect())
    }

    /// Incoming edges resolved to a callee symbol.
    pub async fn edges_to(
        &self,
        workspace_id: &str,
        revision: &str,
        callee_id: &str,
        limit: usize,
    ) -> Result<Vec<CallEdgeRecord>> {
        let rows = sqlx::query(
            "SELECT caller_id, callee_name, callee_id, path, line FROM call_edges
             WHERE workspace_id = ?1 AND revision = ?2 AND callee_id = ?3
             ORDER BY line LIMIT ?4",
        )
        .bind(workspace_id)
        .bind(revision)
        .bind(callee_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| self.edge_from_row(workspace_id, revision, &row))
            .collect())
    }

    pub async fn create_job(&self, workspace_id: &str) -> Result<i64> {
        let result = sqlx::query("INSERT INTO jobs (workspace_id, state) VALUES (?1, ?2)")
            .bind(workspace_id)
            .bind(job_state::QUEUED)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn set_job_running(&self, job_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET state = ?1, updated_at = datetime('now') WHERE id = ?2",
        )
        .bind(job_state::RUNNING)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_job_progress(
        &self,
        job_id: i64,
        progress: f64,
        processed: i64,
        total: i64,
        message: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET progress = ?1, processed = ?2, total = ?3, message = ?4,
                             updated_at = datetime('now')
             WHERE id = ?5",
        )
        .bind(progress)
        .bind(processed)
        .bind(total)
        .bind(message)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn finish_job(&self, job_id: i64, result_json: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET state = ?1, progress = 1.0, result = ?2,
                             updated_at = datetime('now')
             WHERE id = ?3",
        )
        .bind(job_state::FINISHED)
        .bind(result_json)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail_job(&self, job_id: i64, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET state = ?1, error = ?2, updated_at = datetime('now') WHERE id = ?3",
        )
        .bind(job_state::FAILED)
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_job(&self, job_id: i64) -> Result<Option<JobRecord>> {
        let row = sqlx::query(
            "SELECT id, workspace_id, state, progress, processed, total, message, error, result
             FROM jobs WHERE id = ?1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| JobRecord {
            id: row.get("id"),
            workspace_id: row.get("workspace_id"),
            state: row.get("state"),
            progress: row.get("progress"),
            processed: row.get("processed"),
            total: row.get("total"),
            message: row.get("message"),
            error: row.get("error"),
            result: row.get("result"),
        }))
    }

    /// Get the underlying SQLite connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn symbol_from_row(
        &self,
        workspace_id: &str,
        revision: &str,
        row: &sqlx::sqlite::SqliteRow,
    ) -> SymbolRecord {
        SymbolRecord {
            id: row.get("id"),
            workspace_id: workspace_id.to_string(),
            revision: revision.to_string(),
            path: row.get("path"),
            name: row.get("name"),
            qualname: row.get("qualname"),
            kind: row.get("kind"),
            start_line: row.get("start_line"),
            end_line: row.get("end_line"),
        }
    }

    fn edge_from_row(
        &self,
        workspace_id: &str,
        revision: &str,
        row: &sqlx::sqlite::SqliteRow,
    ) -> CallEdgeRecord {
        CallEdgeRecord {
            workspace_id: workspace_id.to_string(),
            revision: revision.to_string(),
            caller_id: row.get("caller_id"),
            callee_name: row.get("callee_name"),
            callee_id: row.get("callee_id"),
            path: row.get("path"),
            line: row.get("line"),
        }
    }
}

/// FTS5 UNINDEXED columns come back as TEXT; parse them defensively.
fn parse_line(row: &sqlx::sqlite::SqliteRow, column: &str) -> i64 {
    row.try_get::<i64, _>(column)
        .or_else(|_| {
            row.try_get::<String, _>(column)
                .map(|s| s.parse().unwrap_or(0))
        })
        .unwrap_or(0)
}

/// Quote each whitespace-separated token so user text cannot break the
/// FTS5 MATCH grammar.
fn fts_match_expression(query: &str) -> String {
    query
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Escape LIKE wildcards so user text matches literally. Every LIKE in
/// this crate pairs with an `ESCAPE '\'` clause.
pub(crate) fn like_escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn push_filter(sql: &mut String, binds: &mut Vec<String>, column: &str, value: Option<&str>) {
    if let Some(value) = value {
        sql.push_str(&format!(" AND {column} = ?{}", binds.len() + 1));
        binds.push(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fts_row(path: &str, start: i64, text: &str) -> ChunkFtsRow {
        ChunkFtsRow {
            workspace_id: "ws".into(),
            revision: "rev".into(),
            path: path.into(),
            start_line: start,
            end_line: start + 5,
            language: "python".into(),
            chunk_kind: "function".into(),
            symbol_name: "".into(),
            text: text.into(),
        }
    }

    fn file_record(path: &str, digest: &str) -> FileRecord {
        FileRecord {
            workspace_id: "ws".into(),
            revision: "rev".into(),
            path: path.into(),
            digest: digest.into(),
            mtime: 1000.0,
            size: 42,
            language: "python".into(),
        }
    }

    #[tokio::test]
    async fn file_record_roundtrip() -> Result<()> {
        let index = SnapshotIndex::open_memory().await?;
        index.ensure_workspace("ws", "/tmp/demo").await?;
        index.touch_snapshot("ws", "rev").await?;

        let record = file_record("src/app.py", "abc123");
        index.replace_chunks_and_file(&record, &[]).await?;

        let fetched = index.get_file_record("ws", "rev", "src/app.py").await?;
        assert_eq!(fetched, Some(record));
        assert!(index.get_file_record("ws", "other", "src/app.py").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn lexical_search_ranks_and_filters() -> Result<()> {
        let index = SnapshotIndex::open_memory().await?;
        let record = file_record("src/db.py", "d1");
        index
            .replace_chunks_and_file(
                &record,
                &[
                    fts_row("src/db.py", 1, "def open_connection(): connect to the database"),
                    fts_row("src/db.py", 10, "def close(): pass"),
                ],
            )
            .await?;

        let hits = index
            .lexical_search("ws", "database connection", &SearchFilters::default(), 10)
            .await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "src/db.py");
        assert_eq!(hits[0].start_line, 1);
        assert!(hits[0].score > 0.0 && hits[0].score <= 1.0);

        let scoped = index
            .lexical_search(
                "ws",
                "database",
                &SearchFilters {
                    path_prefix: Some("other/".into()),
                    ..Default::default()
                },
                10,
            )
            .await?;
        assert!(scoped.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn chunk_replacement_removes_stale_rows() -> Result<()> {
        let index = SnapshotIndex::open_memory().await?;
        let record = file_record("a.py", "v1");
        index
            .replace_chunks_and_file(
                &record,
                &[
                    fts_row("a.py", 1, "alpha content"),
                    fts_row("a.py", 100, "trailing beta content"),
                ],
            )
            .await?;

        let shrunk = file_record("a.py", "v2");
        index
            .replace_chunks_and_file(&shrunk, &[fts_row("a.py", 1, "alpha content")])
            .await?;

        let hits = index
            .lexical_search("ws", "beta", &SearchFilters::default(), 10)
            .await?;
        assert!(hits.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn analysis_replacement_is_per_file() -> Result<()> {
        let index = SnapshotIndex::open_memory().await?;
        let symbol = SymbolRecord {
            id: "sym1".into(),
            workspace_id: "ws".into(),
            revision: "rev".into(),
            path: "a.py".into(),
            name: "helper".into(),
            qualname: "helper".into(),
            kind: "function".into(),
            start_line: 1,
            end_line: 3,
        };
        index
            .replace_analysis("ws", "rev", "a.py", &[symbol.clone()], &[], &[])
            .await?;

        let other = SymbolRecord {
            id: "sym2".into(),
            path: "b.py".into(),
            ..symbol.clone()
        };
        index
            .replace_analysis("ws", "rev", "b.py", &[other], &[], &[])
            .await?;

        // Re-analyzing a.py with nothing wipes only a.py's rows.
        index.replace_analysis("ws", "rev", "a.py", &[], &[], &[]).await?;
        let remaining = index.symbols_named("ws", "rev", "helper", None).await?;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].path, "b.py");
        Ok(())
    }

    #[tokio::test]
    async fn like_wildcards_in_filters_match_literally() -> Result<()> {
        let index = SnapshotIndex::open_memory().await?;
        index
            .replace_chunks_and_file(
                &file_record("my_module/a.py", "d1"),
                &[fts_row("my_module/a.py", 1, "def handler(): dispatch events")],
            )
            .await?;
        index
            .replace_chunks_and_file(
                &file_record("myxmodule/b.py", "d2"),
                &[fts_row("myxmodule/b.py", 1, "def handler(): dispatch events")],
            )
            .await?;

        // `_` is an any-character wildcard in LIKE; the prefix filter must
        // treat it literally.
        let filters = SearchFilters {
            path_prefix: Some("my_module/".into()),
            ..Default::default()
        };
        let hits = index.lexical_search("ws", "dispatch", &filters, 10).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "my_module/a.py");

        let symbol = SymbolRecord {
            id: "s1".into(),
            workspace_id: "ws".into(),
            revision: "rev".into(),
            path: "my_module/a.py".into(),
            name: "do_work".into(),
            qualname: "do_work".into(),
            kind: "function".into(),
            start_line: 1,
            end_line: 2,
        };
        let lookalike = SymbolRecord {
            id: "s2".into(),
            path: "myxmodule/b.py".into(),
            name: "doxwork".into(),
            qualname: "doxwork".into(),
            ..symbol.clone()
        };
        index
            .replace_analysis("ws", "rev", "my_module/a.py", &[symbol], &[], &[])
            .await?;
        index
            .replace_analysis("ws", "rev", "myxmodule/b.py", &[lookalike], &[], &[])
            .await?;

        let found = index.find_symbols("ws", "rev", "o_w", None, 10).await?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "do_work");

        assert_eq!(like_escape("my_module/%"), "my\\_module/\\%");
        Ok(())
    }

    #[tokio::test]
    async fn job_lifecycle() -> Result<()> {
        let index = SnapshotIndex::open_memory().await?;
        let job_id = index.create_job("ws").await?;

        let job = index.get_job(job_id).await?.unwrap();
        assert_eq!(job.state, job_state::QUEUED);

        index.set_job_running(job_id).await?;
        index.update_job_progress(job_id, 0.5, 5, 10, "indexing").await?;
        let job = index.get_job(job_id).await?.unwrap();
        assert_eq!(job.state, job_state::RUNNING);
        assert_eq!(job.processed, 5);

        index.finish_job(job_id, "{\"files_total\":10}").await?;
        let job = index.get_job(job_id).await?.unwrap();
        assert_eq!(job.state, job_state::FINISHED);
        assert_eq!(job.result.as_deref(), Some("{\"files_total\":10}"));
        Ok(())
    }
}

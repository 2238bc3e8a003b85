//! codescout command line interface.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use codescout_embed::HashEmbedProvider;
use std::path::PathBuf;
use std::sync::Arc;

use codescout_retriever::retrieval::{
    identity::{detect_revision, workspace_id_for},
    indexing_engine::{FileSelection, IndexingEngine, IndexingEngineConfig},
    rerank::NoopReranker,
    search_engine::{DEFAULT_GRAPH_FANOUT, GraphDirection, SearchEngine},
    snapshot_index::{SearchFilters, SnapshotIndex},
    vector_index::SqliteVectorIndex,
};

#[derive(Parser)]
#[command(name = "codescout", about = "Local, revision-aware code search")]
struct Cli {
    /// Workspace root to index or query.
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Where the index database lives (env: CODESCOUT_DATA_DIR).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index the workspace (or an explicit set of relative paths).
    Index {
        /// Restrict the run to these workspace-relative paths.
        #[arg(long)]
        paths: Vec<String>,
    },
    /// Search indexed chunks.
    Search {
        query: String,
        #[arg(long, value_enum, default_value_t = SearchMode::Hybrid)]
        mode: SearchMode,
        #[arg(long, default_value_t = 10)]
        top_k: usize,
        /// Semantic weight for hybrid fusion.
        #[arg(long, default_value_t = 0.5)]
        alpha: f32,
        #[arg(long)]
        path_prefix: Option<String>,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        rerank: bool,
    },
    /// Look up symbol definitions by name substring.
    Symbols {
        name: String,
        #[arg(long)]
        path_prefix: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Look up references by exact name.
    References {
        name: String,
        #[arg(long)]
        path_prefix: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Walk the call graph around a symbol id.
    Callgraph {
        symbol_id: String,
        #[arg(long, default_value_t = 2)]
        depth: usize,
        #[arg(long, value_enum, default_value_t = Direction::Both)]
        direction: Direction,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SearchMode {
    Lexical,
    Semantic,
    Hybrid,
}

#[derive(Clone, Copy, ValueEnum)]
enum Direction {
    Out,
    In,
    Both,
}

impl From<Direction> for GraphDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Out => GraphDirection::Out,
            Direction::In => GraphDirection::In,
            Direction::Both => GraphDirection::Both,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();
    let data_dir = cli
        .data_dir
        .or_else(|| std::env::var("CODESCOUT_DATA_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(|| cli.workspace.join(".codescout"));

    let snapshot = SnapshotIndex::open(&data_dir).await?;
    let vectors = Arc::new(SqliteVectorIndex::new(snapshot.pool().clone()).await?);
    let embedder = Arc::new(HashEmbedProvider::default());

    match cli.command {
        Command::Index { paths } => {
            let mut config = IndexingEngineConfig::new(cli.workspace.clone());
            if let Ok(max_chars) = std::env::var("CODESCOUT_MAX_CHUNK_CHARS")
                && let Ok(max_chars) = max_chars.parse::<usize>()
            {
                config = config.with_max_chunk_chars(max_chars);
            }
            let engine = IndexingEngine::new(config, snapshot, vectors, embedder).await?;
            let selection = if paths.is_empty() {
                FileSelection::FullDiscovery
            } else {
                FileSelection::Paths(paths)
            };
            let summary = engine.run(selection, None).await?;
            println!(
                "{} of {} files changed",
                summary.files_changed, summary.files_total
            );
        }
        command => {
            let workspace_id = workspace_id_for(&cli.workspace);
            let revision = detect_revision(&cli.workspace).await;
            let engine = SearchEngine::new(
                workspace_id,
                revision,
                snapshot,
                vectors,
                embedder,
                Arc::new(NoopReranker),
            );
            run_query(&engine, command).await?;
        }
    }
    Ok(())
}

async fn run_query(engine: &SearchEngine, command: Command) -> Result<()> {
    match command {
        Command::Search {
            query,
            mode,
            top_k,
            alpha,
            path_prefix,
            language,
            rerank,
        } => {
            let filters = SearchFilters {
                path_prefix,
                language,
                ..Default::default()
            };
            let hits = match mode {
                SearchMode::Lexical => engine.lexical(&query, &filters, top_k).await?,
                SearchMode::Semantic => engine.semantic(&query, &filters, top_k).await?,
                SearchMode::Hybrid => {
                    engine.hybrid(&query, &filters, top_k, alpha, rerank).await?
                }
            };
            for hit in hits {
                println!(
                    "{:.3}\t{}:{}-{}\t{}\t{}",
                    hit.score, hit.path, hit.start_line, hit.end_line, hit.chunk_kind,
                    hit.symbol_name
                );
            }
        }
        Command::Symbols {
            name,
            path_prefix,
            limit,
        } => {
            let symbols = engine
                .find_symbols(&name, path_prefix.as_deref(), limit)
                .await?;
            for symbol in symbols {
                println!(
                    "{}\t{}\t{}:{}-{}\t{}",
                    symbol.qualname, symbol.kind, symbol.path, symbol.start_line,
                    symbol.end_line, symbol.id
                );
            }
        }
        Command::References {
            name,
            path_prefix,
            limit,
        } => {
            let references = engine
                .find_references(&name, path_prefix.as_deref(), limit)
                .await?;
            for reference in references {
                println!(
                    "{}:{}:{}\t{}",
                    reference.path, reference.line, reference.col, reference.context
                );
            }
        }
        Command::Callgraph {
            symbol_id,
            depth,
            direction,
        } => {
            let graph = engine
                .call_graph(&symbol_id, depth, direction.into(), DEFAULT_GRAPH_FANOUT)
                .await?;
            for node in &graph.nodes {
                let marker = if node.missing { " (missing)" } else { "" };
                println!("node\t{}\t{}{}", node.id, node.qualname, marker);
            }
            for edge in &graph.edges {
                println!("edge\t{} -> {}\tline {}", edge.from, edge.to, edge.line);
            }
        }
        Command::Index { .. } => unreachable!("handled in main"),
    }
    Ok(())
}

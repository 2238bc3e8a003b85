//! Content-addressed identity.
//!
//! Every durable id in the index is a hex blake3 digest over a canonical
//! string, so re-indexing unchanged content always lands on the same rows
//! and vector points. Nothing here is random or time-dependent.

use anyhow::Result;
use std::path::Path;
use std::time::Duration;

/// Sentinel revision for a tree that is not under source control (or where
/// git cannot be queried).
pub const WORKING_TREE_REVISION: &str = "working_tree";

/// Stable workspace id: hex blake3 of the canonicalized absolute root path.
pub fn workspace_id_for(root: &Path) -> String {
    let canonical = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    hex::encode(blake3::hash(canonical.to_string_lossy().as_bytes()).as_bytes())
}

/// Hex blake3 digest of chunk or file text.
pub fn text_digest(text: &str) -> String {
    hex::encode(blake3::hash(text.as_bytes()).as_bytes())
}

/// Hex blake3 digest of raw file bytes.
pub fn bytes_digest(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

/// Deterministic symbol id. Re-analyzing identical content yields the
/// identical id.
pub fn symbol_id(
    workspace_id: &str,
    revision: &str,
    path: &str,
    qualname: &str,
    kind: &str,
    start_line: usize,
    end_line: usize,
) -> String {
    let key = format!("{workspace_id}|{revision}|{path}|{qualname}|{kind}|{start_line}|{end_line}");
    hex::encode(blake3::hash(key.as_bytes()).as_bytes())
}

/// Deterministic vector point id, derived from chunk location and text
/// digest so identical content never duplicates points across runs.
pub fn point_id(
    workspace_id: &str,
    revision: &str,
    path: &str,
    start_line: usize,
    end_line: usize,
    text_digest: &str,
) -> String {
    let key = format!("{workspace_id}:{revision}:{path}:{start_line}:{end_line}:{text_digest}");
    hex::encode(blake3::hash(key.as_bytes()).as_bytes())
}

/// Best-effort revision detection: `git rev-parse HEAD` with a short
/// timeout, falling back to [`WORKING_TREE_REVISION`].
pub async fn detect_revision(root: &Path) -> String {
    let command = tokio::process::Command::new("git")
        .arg("rev-parse")
        .arg("HEAD")
        .current_dir(root)
        .output();
    match tokio::time::timeout(Duration::from_secs(2), command).await {
        Ok(Ok(output)) if output.status.success() => {
            let rev = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if rev.is_empty() {
                WORKING_TREE_REVISION.to_string()
            } else {
                rev.chars().take(40).collect()
            }
        }
        _ => WORKING_TREE_REVISION.to_string(),
    }
}

/// File modification time as seconds since the epoch, 0.0 when unavailable.
pub fn mtime_seconds(metadata: &std::fs::Metadata) -> f64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

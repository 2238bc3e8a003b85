//! File discovery with ignore rules.
//!
//! Walks the workspace honoring gitignore semantics plus a
//! `.codescoutignore` file, and filters out what indexing can never use:
//! hidden entries, symlinks, known binary extensions, and oversized files.
//! Read-only; change classification happens in the indexing engine against
//! stored file records.

use anyhow::Result;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Hard cap on file size; anything larger is skipped during discovery.
pub const MAX_FILE_SIZE_BYTES: u64 = 1024 * 1024;

const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "ico", "pdf", "zip", "tar", "gz", "7z", "exe", "dll",
    "so", "dylib", "bin", "o", "a", "class", "pyc", "woff", "woff2", "ttf",
];

/// Walk the workspace and return indexable files as sorted
/// workspace-relative paths.
pub fn discover_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .add_custom_ignore_filename(".codescoutignore")
        .follow_links(false)
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!("Skipping unreadable entry: {err}");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        if is_binary_extension(path) {
            continue;
        }
        match entry.metadata() {
            Ok(metadata) if metadata.len() <= MAX_FILE_SIZE_BYTES => {}
            Ok(metadata) => {
                debug!(
                    "Skipping oversized file {} ({} bytes)",
                    path.display(),
                    metadata.len()
                );
                continue;
            }
            Err(err) => {
                debug!("Skipping file without metadata {}: {err}", path.display());
                continue;
            }
        }
        if let Ok(relative) = path.strip_prefix(root) {
            files.push(relative.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

fn is_binary_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .is_some_and(|ext| BINARY_EXTENSIONS.contains(&ext.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn discovers_sorted_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/b.py"), "pass").unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();

        let files = discover_files(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![PathBuf::from("a.txt"), PathBuf::from("src/b.py")]
        );
    }

    #[test]
    fn skips_binary_hidden_and_oversized() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("logo.png"), [0u8; 16]).unwrap();
        fs::write(dir.path().join(".hidden"), "secret").unwrap();
        fs::write(
            dir.path().join("huge.txt"),
            "x".repeat((MAX_FILE_SIZE_BYTES + 1) as usize),
        )
        .unwrap();
        fs::write(dir.path().join("keep.py"), "pass").unwrap();

        let files = discover_files(dir.path()).unwrap();
        assert_eq!(files, vec![PathBuf::from("keep.py")]);
    }

    #[test]
    fn honors_codescoutignore() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".codescoutignore"), "generated/\n").unwrap();
        fs::create_dir_all(dir.path().join("generated")).unwrap();
        fs::write(dir.path().join("generated/out.py"), "pass").unwrap();
        fs::write(dir.path().join("main.py"), "pass").unwrap();

        let files = discover_files(dir.path()).unwrap();
        assert_eq!(files, vec![PathBuf::from("main.py")]);
    }
}

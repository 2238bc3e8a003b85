//! Workspace path boundary.
//!
//! Every path that crosses the public API is workspace-relative and
//! forward-slash normalized. Absolute paths, `..` traversal, and anything
//! that would escape the workspace root are rejected here, before any
//! filesystem or index access happens.

use std::path::{Component, Path, PathBuf};

/// Access-denied condition for paths that leave the workspace.
#[derive(Debug, thiserror::Error)]
pub enum PathAccessError {
    #[error("absolute paths are not allowed: {path}")]
    Absolute { path: String },

    #[error("path traversal is not allowed: {path}")]
    Traversal { path: String },

    #[error("path escapes the workspace root: {path}")]
    OutsideRoot { path: String },
}

/// Validate a caller-supplied relative path and return its normalized
/// forward-slash form. Does not touch the filesystem.
pub fn normalize_relative(path: &str) -> Result<String, PathAccessError> {
    let raw = Path::new(path);
    if raw.is_absolute() || path.starts_with('/') || path.starts_with('\\') {
        return Err(PathAccessError::Absolute {
            path: path.to_string(),
        });
    }
    let mut parts: Vec<&str> = Vec::new();
    for component in raw.components() {
        match component {
            Component::Normal(p) => {
                let Some(p) = p.to_str() else {
                    return Err(PathAccessError::Traversal {
                        path: path.to_string(),
                    });
                };
                parts.push(p);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(PathAccessError::Traversal {
                    path: path.to_string(),
                });
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathAccessError::Absolute {
                    path: path.to_string(),
                });
            }
        }
    }
    Ok(parts.join("/"))
}

/// Resolve a validated relative path under the workspace root, rejecting
/// symlinked escapes when the target already exists on disk.
pub fn resolve_in_workspace(root: &Path, relative: &str) -> Result<PathBuf, PathAccessError> {
    let normalized = normalize_relative(relative)?;
    let joined = root.join(&normalized);
    if let Ok(canonical) = joined.canonicalize() {
        let canonical_root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        if !canonical.starts_with(&canonical_root) {
            return Err(PathAccessError::OutsideRoot {
                path: relative.to_string(),
            });
        }
    }
    Ok(joined)
}

/// Forward-slash form of a path already known to be workspace-relative.
pub fn to_unix_string(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(p) => p.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_and_normalizes_relative_paths() {
        assert_eq!(normalize_relative("src/app.py").unwrap(), "src/app.py");
        assert_eq!(normalize_relative("./src/app.py").unwrap(), "src/app.py");
    }

    #[test]
    fn rejects_absolute_paths() {
        assert!(matches!(
            normalize_relative("/etc/passwd"),
            Err(PathAccessError::Absolute { .. })
        ));
    }

    #[test]
    fn rejects_traversal() {
        assert!(matches!(
            normalize_relative("../outside.txt"),
            Err(PathAccessError::Traversal { .. })
        ));
        assert!(matches!(
            normalize_relative("src/../../outside.txt"),
            Err(PathAccessError::Traversal { .. })
        ));
    }

    #[test]
    fn resolves_inside_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        let resolved = resolve_in_workspace(dir.path(), "a.txt").unwrap();
        assert!(resolved.ends_with("a.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escaping_the_root() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let target = outside.path().join("secret.txt");
        std::fs::write(&target, "hidden").unwrap();
        std::os::unix::fs::symlink(&target, root.path().join("link.txt")).unwrap();

        assert!(matches!(
            resolve_in_workspace(root.path(), "link.txt"),
            Err(PathAccessError::OutsideRoot { .. })
        ));
        // A symlink staying inside the root is fine.
        std::fs::write(root.path().join("real.txt"), "ok").unwrap();
        std::os::unix::fs::symlink(
            root.path().join("real.txt"),
            root.path().join("alias.txt"),
        )
        .unwrap();
        assert!(resolve_in_workspace(root.path(), "alias.txt").is_ok());
    }
}

//! File-extension based language detection.
//!
//! Only Python gets structural analysis; every other language is still
//! detected so chunks and search filters carry a useful label.

use serde::Serialize;
use std::path::Path;

/// Detected source language of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Rust,
    Go,
    Java,
    Kotlin,
    C,
    Cpp,
    CSharp,
    Markdown,
    Json,
    Yaml,
    Toml,
    Bash,
    Sql,
    Text,
}

impl Language {
    /// Detect language from a file extension (without the dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "py" | "pyw" => Self::Python,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "ts" | "tsx" => Self::TypeScript,
            "rs" => Self::Rust,
            "go" => Self::Go,
            "java" => Self::Java,
            "kt" | "kts" => Self::Kotlin,
            "c" | "h" => Self::C,
            "cpp" | "cc" | "cxx" | "hpp" => Self::Cpp,
            "cs" => Self::CSharp,
            "md" | "markdown" => Self::Markdown,
            "json" => Self::Json,
            "yml" | "yaml" => Self::Yaml,
            "toml" => Self::Toml,
            "sh" => Self::Bash,
            "sql" => Self::Sql,
            _ => Self::Text,
        }
    }

    /// Detect language from a file path.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(Self::Text, Self::from_extension)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Rust => "rust",
            Self::Go => "go",
            Self::Java => "java",
            Self::Kotlin => "kotlin",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Markdown => "markdown",
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Toml => "toml",
            Self::Bash => "bash",
            Self::Sql => "sql",
            Self::Text => "text",
        }
    }

    /// Whether this language is structurally analyzed (syntax-tree chunking,
    /// symbols, references, call edges).
    pub const fn supports_analysis(self) -> bool {
        matches!(self, Self::Python)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_from_path() {
        assert_eq!(Language::from_path("src/app.py"), Language::Python);
        assert_eq!(Language::from_path("lib/mod.rs"), Language::Rust);
        assert_eq!(Language::from_path("README.md"), Language::Markdown);
        assert_eq!(Language::from_path("Makefile"), Language::Text);
    }

    #[test]
    fn only_python_is_analyzed() {
        assert!(Language::Python.supports_analysis());
        assert!(!Language::Rust.supports_analysis());
        assert!(!Language::Text.supports_analysis());
    }
}

//! Code-aware chunking.
//!
//! Python files are split along their syntax tree: one leading module chunk
//! for imports/context, then one chunk per top-level function or class.
//! Definitions larger than the character budget are split into sequential
//! non-overlapping windows that preserve original line numbers. Every other
//! language falls back to fixed-size line windows with trailing overlap, so
//! a match near a boundary is never cut off. Parsing problems degrade to the
//! window fallback; chunking never fails.

use serde::Serialize;
use tree_sitter::Node;

use crate::language::Language;
use crate::parse_python;

/// What a chunk covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    /// Leading slice of a file (imports, globals).
    Module,
    Function,
    Class,
    /// Fixed-size slice, either fallback chunking or an oversized definition.
    Window,
}

impl ChunkKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Function => "function",
            Self::Class => "class",
            Self::Window => "window",
        }
    }
}

/// A bounded, line-ranged slice of a file. Line numbers are 1-based and
/// inclusive; `text` is trimmed and never empty.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub path: String,
    pub language: Language,
    pub kind: ChunkKind,
    /// Owning symbol for function/class chunks and their windows.
    pub symbol_name: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
}

/// Chunking limits. Defaults match the indexer's ingestion budget.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Character budget per chunk; larger definitions get windowed.
    pub max_chunk_chars: usize,
    /// Lines covered by the leading module chunk.
    pub module_head_lines: usize,
    /// Window height for non-analyzed languages.
    pub fallback_max_lines: usize,
    /// Trailing lines repeated between consecutive fallback windows.
    pub fallback_overlap_lines: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 8000,
            module_head_lines: 80,
            fallback_max_lines: 220,
            fallback_overlap_lines: 40,
        }
    }
}

/// Split a file into ordered chunks. Infallible: malformed input degrades
/// to window chunking.
pub fn chunk_file(path: &str, text: &str, language: Language, config: &ChunkerConfig) -> Vec<Chunk> {
    if language.supports_analysis() {
        chunk_python(path, text, config)
    } else {
        fallback_windows(path, text, language, config)
    }
}

fn chunk_python(path: &str, text: &str, config: &ChunkerConfig) -> Vec<Chunk> {
    let Some(tree) = parse_python(text) else {
        return fallback_windows(path, text, Language::Python, config);
    };
    let root = tree.root_node();
    if root.has_error() {
        return fallback_windows(path, text, Language::Python, config);
    }

    let lines: Vec<&str> = text.lines().collect();
    let mut chunks = Vec::new();

    let head_end = lines.len().min(config.module_head_lines);
    let head_text = lines[..head_end].join("\n");
    let head_text = truncate_chars(head_text.trim(), config.max_chunk_chars);
    if !head_text.is_empty() {
        chunks.push(Chunk {
            path: path.to_string(),
            language: Language::Python,
            kind: ChunkKind::Module,
            symbol_name: None,
            start_line: 1,
            end_line: head_end,
            text: head_text,
        });
    }

    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        let Some((def, kind)) = top_level_definition(child) else {
            continue;
        };
        let name = def
            .child_by_field_name("name")
            .and_then(|n| n.utf8_text(text.as_bytes()).ok())
            .unwrap_or("<unknown>")
            .to_string();
        let start = def.start_position().row + 1;
        let end = def.end_position().row + 1;
        if start > lines.len() {
            continue;
        }
        let end = end.min(lines.len());
        let seg_lines = &lines[start - 1..end];
        let seg_text = seg_lines.join("\n");
        let seg_text = seg_text.trim();
        if seg_text.is_empty() {
            continue;
        }
        if seg_text.chars().count() > config.max_chunk_chars {
            window_split(path, &name, seg_lines, start, config.max_chunk_chars, &mut chunks);
        } else {
            chunks.push(Chunk {
                path: path.to_string(),
                language: Language::Python,
                kind,
                symbol_name: Some(name),
                start_line: start,
                end_line: end,
                text: seg_text.to_string(),
            });
        }
    }
    chunks
}

/// Unwrap decorated definitions and classify the node, if it is one of the
/// definition forms we chunk on.
fn top_level_definition(node: Node<'_>) -> Option<(Node<'_>, ChunkKind)> {
    let def = if node.kind() == "decorated_definition" {
        node.child_by_field_name("definition")?
    } else {
        node
    };
    match def.kind() {
        "function_definition" => Some((def, ChunkKind::Function)),
        "class_definition" => Some((def, ChunkKind::Class)),
        _ => None,
    }
}

/// Split an oversized definition into sequential non-overlapping windows,
/// each under the character budget, tagged with the owning symbol.
fn window_split(
    path: &str,
    symbol: &str,
    seg_lines: &[&str],
    start_line: usize,
    max_chars: usize,
    out: &mut Vec<Chunk>,
) {
    let mut buf: Vec<&str> = Vec::new();
    let mut buf_start = start_line;
    let mut cur_line = start_line;

    let flush = |buf: &[&str], buf_start: usize, end_line: usize, out: &mut Vec<Chunk>| {
        let text = buf.join("\n");
        let text = text.trim();
        if !text.is_empty() {
            out.push(Chunk {
                path: path.to_string(),
                language: Language::Python,
                kind: ChunkKind::Window,
                symbol_name: Some(symbol.to_string()),
                start_line: buf_start,
                end_line,
                text: text.to_string(),
            });
        }
    };

    for line in seg_lines {
        let prospective: usize = buf.iter().map(|l| l.chars().count() + 1).sum::<usize>()
            + line.chars().count();
        if !buf.is_empty() && prospective > max_chars {
            flush(&buf, buf_start, cur_line - 1, out);
            buf.clear();
            buf_start = cur_line;
        }
        buf.push(line);
        cur_line += 1;
    }
    if !buf.is_empty() {
        flush(&buf, buf_start, cur_line - 1, out);
    }
}

/// Fixed-size line windows with trailing overlap, used for every
/// non-analyzed language and as the Python parse-failure fallback.
fn fallback_windows(
    path: &str,
    text: &str,
    language: Language,
    config: &ChunkerConfig,
) -> Vec<Chunk> {
    let lines: Vec<&str> = text.lines().collect();
    let n = lines.len();
    let max_lines = config.fallback_max_lines.max(1);
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < n {
        let j = (i + max_lines).min(n);
        let window = lines[i..j].join("\n");
        let window = window.trim();
        if !window.is_empty() {
            out.push(Chunk {
                path: path.to_string(),
                language,
                kind: ChunkKind::Window,
                symbol_name: None,
                start_line: i + 1,
                end_line: j,
                text: window.to_string(),
            });
        }
        if j >= n {
            break;
        }
        // Overlap must leave forward progress even if misconfigured.
        i = j.saturating_sub(config.fallback_overlap_lines).max(i + 1);
    }
    out
}

/// Char-boundary-safe prefix truncation.
fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => s[..byte_idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ChunkerConfig {
        ChunkerConfig::default()
    }

    #[test]
    fn python_module_and_definition_chunks() {
        let src = "import os\n\ndef alpha():\n    return 1\n\nclass Beta:\n    def method(self):\n        return 2\n";
        let chunks = chunk_file("m.py", src, Language::Python, &cfg());

        assert_eq!(chunks[0].kind, ChunkKind::Module);
        assert_eq!(chunks[0].start_line, 1);

        let alpha = chunks.iter().find(|c| c.symbol_name.as_deref() == Some("alpha")).unwrap();
        assert_eq!(alpha.kind, ChunkKind::Function);
        assert_eq!((alpha.start_line, alpha.end_line), (3, 4));

        let beta = chunks.iter().find(|c| c.symbol_name.as_deref() == Some("Beta")).unwrap();
        assert_eq!(beta.kind, ChunkKind::Class);
        assert!(beta.text.contains("def method"));
    }

    #[test]
    fn decorated_and_async_definitions_are_chunked() {
        let src = "@wraps(f)\ndef deco():\n    pass\n\nasync def fetch():\n    pass\n";
        let chunks = chunk_file("m.py", src, Language::Python, &cfg());
        let names: Vec<_> = chunks.iter().filter_map(|c| c.symbol_name.as_deref()).collect();
        assert!(names.contains(&"deco"));
        assert!(names.contains(&"fetch"));
    }

    #[test]
    fn oversized_function_is_windowed_without_gaps() {
        let mut src = String::from("def big():\n");
        for i in 0..1000 {
            src.push_str(&format!("    x{i} = {i}\n"));
        }
        let mut config = cfg();
        config.max_chunk_chars = 1000;
        let chunks = chunk_file("big.py", &src, Language::Python, &config);

        let windows: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::Window)
            .collect();
        assert!(windows.len() > 1);
        for w in &windows {
            assert!(w.text.chars().count() <= 1000);
            assert_eq!(w.symbol_name.as_deref(), Some("big"));
        }
        // Union of window ranges reconstructs the function's range, no gaps.
        assert_eq!(windows.first().unwrap().start_line, 1);
        assert_eq!(windows.last().unwrap().end_line, 1001);
        for pair in windows.windows(2) {
            assert_eq!(pair[1].start_line, pair[0].end_line + 1);
        }
    }

    #[test]
    fn fallback_windows_overlap() {
        let src: String = (0..500).map(|i| format!("line {i}\n")).collect();
        let chunks = chunk_file("notes.txt", &src, Language::Text, &cfg());
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.end_line - c.start_line + 1 <= 220);
        }
        for pair in chunks.windows(2) {
            // 40 trailing lines repeat at the head of the next window.
            assert_eq!(pair[1].start_line, pair[0].end_line - 39);
        }
    }

    #[test]
    fn broken_python_degrades_to_windows() {
        let src = "def broken(:\n    ???\n";
        let chunks = chunk_file("bad.py", src, Language::Python, &cfg());
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.kind == ChunkKind::Window));
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_file("e.py", "", Language::Python, &cfg()).is_empty());
        assert!(chunk_file("e.txt", "\n\n\n", Language::Text, &cfg()).is_empty());
    }
}

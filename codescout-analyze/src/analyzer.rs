//! Structural analysis of Python source.
//!
//! A single pass over the syntax tree collects symbol definitions with
//! scope-qualified names, best-effort name references with surrounding-line
//! context, and caller→callee call sites. The walk keeps explicit scope and
//! callable stacks; nothing here resolves imports or types. Malformed input
//! yields an empty analysis, never an error.

use serde::Serialize;
use tree_sitter::Node;

use crate::parse_python;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Class,
    Method,
}

impl SymbolKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Method => "method",
        }
    }
}

/// A named definition. `qualname` is the dot-joined scope path plus the name.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolDef {
    pub name: String,
    pub qualname: String,
    pub kind: SymbolKind,
    pub start_line: usize,
    pub end_line: usize,
}

/// A read-context use of a name, with a bounded slice of its source line.
#[derive(Debug, Clone, Serialize)]
pub struct NameRef {
    pub name: String,
    pub line: usize,
    pub col: usize,
    pub context: String,
}

/// A call expression attributed to the innermost enclosing callable.
#[derive(Debug, Clone, Serialize)]
pub struct CallSite {
    pub caller_qualname: String,
    /// Dotted access path when the callee is a simple name or attribute
    /// chain, otherwise `<call>`.
    pub callee: String,
    pub line: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FileAnalysis {
    pub definitions: Vec<SymbolDef>,
    pub references: Vec<NameRef>,
    pub calls: Vec<CallSite>,
}

/// Bytes of line context kept on each side of a referenced name.
const REF_CONTEXT_RADIUS: usize = 40;

/// Analyze Python source. Returns an empty analysis on parse failure.
pub fn analyze_python(text: &str) -> FileAnalysis {
    let Some(tree) = parse_python(text) else {
        return FileAnalysis::default();
    };
    let root = tree.root_node();
    if root.has_error() {
        return FileAnalysis::default();
    }
    let mut walker = Walker {
        src: text,
        lines: text.lines().collect(),
        scope: Vec::new(),
        callables: Vec::new(),
        out: FileAnalysis::default(),
    };
    walker.visit(root);
    walker.out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Class,
    Callable,
}

/// Traversal state: explicit scope and callable stacks instead of any
/// dynamic dispatch over node types.
struct Walker<'a> {
    src: &'a str,
    lines: Vec<&'a str>,
    scope: Vec<(String, ScopeKind)>,
    callables: Vec<String>,
    out: FileAnalysis,
}

impl<'a> Walker<'a> {
    fn visit(&mut self, node: Node<'a>) {
        match node.kind() {
            "class_definition" => {
                self.visit_class(node);
                return;
            }
            "function_definition" => {
                self.visit_function(node);
                return;
            }
            "call" => {
                if let Some(caller) = self.callables.last() {
                    let callee = node
                        .child_by_field_name("function")
                        .map(|f| self.access_path(f))
                        .unwrap_or_else(|| "<call>".to_string());
                    self.out.calls.push(CallSite {
                        caller_qualname: caller.clone(),
                        callee,
                        line: node.start_position().row + 1,
                    });
                }
            }
            "identifier" => {
                if self.is_read_context(node) {
                    self.emit_reference(node);
                }
            }
            _ => {}
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'a>> = node.children(&mut cursor).collect();
        for child in children {
            self.visit(child);
        }
    }

    fn visit_class(&mut self, node: Node<'a>) {
        let name = self.node_text(node.child_by_field_name("name"));
        self.out.definitions.push(SymbolDef {
            qualname: self.qualify(&name),
            name: name.clone(),
            kind: SymbolKind::Class,
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
        });
        self.scope.push((name, ScopeKind::Class));
        self.visit_children(node);
        self.scope.pop();
    }

    fn visit_function(&mut self, node: Node<'a>) {
        let name = self.node_text(node.child_by_field_name("name"));
        let qualname = self.qualify(&name);
        // Method iff the innermost enclosing scope is a class body.
        let kind = match self.scope.last() {
            Some((_, ScopeKind::Class)) => SymbolKind::Method,
            _ => SymbolKind::Function,
        };
        self.out.definitions.push(SymbolDef {
            name: name.clone(),
            qualname: qualname.clone(),
            kind,
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
        });
        self.scope.push((name, ScopeKind::Callable));
        self.callables.push(qualname);
        self.visit_children(node);
        self.callables.pop();
        self.scope.pop();
    }

    fn visit_children(&mut self, node: Node<'a>) {
        let mut cursor = node.walk();
        let children: Vec<Node<'a>> = node.children(&mut cursor).collect();
        for child in children {
            self.visit(child);
        }
    }

    /// Best-effort read-context check: skip definition names, parameter
    /// names, attribute tails, keyword-argument names, and simple
    /// assignment/loop targets.
    fn is_read_context(&self, node: Node<'a>) -> bool {
        let Some(parent) = node.parent() else {
            return true;
        };
        let is_field = |field: &str| {
            parent
                .child_by_field_name(field)
                .is_some_and(|n| n.id() == node.id())
        };
        match parent.kind() {
            "function_definition" | "class_definition" => !is_field("name"),
            "attribute" => !is_field("attribute"),
            "keyword_argument" => !is_field("name"),
            "parameters" => false,
            "typed_parameter" => node.prev_sibling().is_some(),
            "default_parameter" | "typed_default_parameter" => !is_field("name"),
            "assignment" | "augmented_assignment" | "for_statement" => !is_field("left"),
            // Unpacking targets: `a, b = ...`, `for k, v in ...`, `[x] = ...`.
            "pattern_list" | "tuple_pattern" | "list_pattern" | "list_splat_pattern" => false,
            "global_statement" | "nonlocal_statement" => false,
            _ => true,
        }
    }

    fn emit_reference(&mut self, node: Node<'a>) {
        let name = self.node_text(Some(node));
        let row = node.start_position().row;
        let col = node.start_position().column;
        let line_text = self.lines.get(row).copied().unwrap_or("");
        let context = context_slice(line_text, col, name.len());
        self.out.references.push(NameRef {
            name,
            line: row + 1,
            col,
            context,
        });
    }

    /// Render a dotted access path for an identifier or attribute chain.
    fn access_path(&self, node: Node<'a>) -> String {
        match node.kind() {
            "identifier" => self.node_text(Some(node)),
            "attribute" => {
                let mut parts = Vec::new();
                let mut cur = node;
                while cur.kind() == "attribute" {
                    if let Some(attr) = cur.child_by_field_name("attribute") {
                        parts.push(self.node_text(Some(attr)));
                    }
                    match cur.child_by_field_name("object") {
                        Some(obj) => cur = obj,
                        None => break,
                    }
                }
                if cur.kind() == "identifier" {
                    parts.push(self.node_text(Some(cur)));
                }
                parts.reverse();
                if parts.is_empty() {
                    "<call>".to_string()
                } else {
                    parts.join(".")
                }
            }
            _ => "<call>".to_string(),
        }
    }

    fn qualify(&self, name: &str) -> String {
        if self.scope.is_empty() {
            name.to_string()
        } else {
            let path: Vec<&str> = self.scope.iter().map(|(n, _)| n.as_str()).collect();
            format!("{}.{}", path.join("."), name)
        }
    }

    fn node_text(&self, node: Option<Node<'a>>) -> String {
        node.and_then(|n| n.utf8_text(self.src.as_bytes()).ok())
            .unwrap_or("<unknown>")
            .to_string()
    }
}

/// Slice a source line around a byte column, clamped to char boundaries.
fn context_slice(line: &str, col: usize, name_len: usize) -> String {
    let mut start = col.saturating_sub(REF_CONTEXT_RADIUS).min(line.len());
    while start > 0 && !line.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (col + name_len + REF_CONTEXT_RADIUS).min(line.len());
    while end < line.len() && !line.is_char_boundary(end) {
        end += 1;
    }
    line[start..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_are_scope_qualified() {
        let src = "class Outer:\n    class Inner:\n        def handle(self):\n            pass\n\ndef free():\n    pass\n";
        let analysis = analyze_python(src);
        let quals: Vec<(&str, SymbolKind)> = analysis
            .definitions
            .iter()
            .map(|d| (d.qualname.as_str(), d.kind))
            .collect();
        assert!(quals.contains(&("Outer", SymbolKind::Class)));
        assert!(quals.contains(&("Outer.Inner", SymbolKind::Class)));
        assert!(quals.contains(&("Outer.Inner.handle", SymbolKind::Method)));
        assert!(quals.contains(&("free", SymbolKind::Function)));
    }

    #[test]
    fn nested_function_is_not_a_method() {
        let src = "def outer():\n    def inner():\n        pass\n";
        let analysis = analyze_python(src);
        let inner = analysis
            .definitions
            .iter()
            .find(|d| d.name == "inner")
            .unwrap();
        assert_eq!(inner.kind, SymbolKind::Function);
        assert_eq!(inner.qualname, "outer.inner");
    }

    #[test]
    fn calls_attribute_to_innermost_callable() {
        let src = "def worker():\n    helper()\n    obj.field.save()\n\nhelper()\n";
        let analysis = analyze_python(src);
        let callees: Vec<(&str, &str)> = analysis
            .calls
            .iter()
            .map(|c| (c.caller_qualname.as_str(), c.callee.as_str()))
            .collect();
        assert!(callees.contains(&("worker", "helper")));
        assert!(callees.contains(&("worker", "obj.field.save")));
        // Module-level calls have no enclosing callable and are not recorded.
        assert_eq!(analysis.calls.len(), 2);
    }

    #[test]
    fn complex_callee_renders_placeholder() {
        let src = "def f():\n    (get_handler())()\n";
        let analysis = analyze_python(src);
        assert!(analysis.calls.iter().any(|c| c.callee == "<call>"));
    }

    #[test]
    fn references_skip_store_contexts() {
        let src = "def f(param):\n    total = param + other\n    return total\n";
        let analysis = analyze_python(src);
        let names: Vec<&str> = analysis.references.iter().map(|r| r.name.as_str()).collect();
        assert!(names.contains(&"param"));
        assert!(names.contains(&"other"));
        assert!(names.contains(&"total")); // the `return total` read
        // Definition name and the assignment target occurrence are skipped.
        assert!(!names.contains(&"f"));
        assert_eq!(names.iter().filter(|n| **n == "total").count(), 1);
    }

    #[test]
    fn unpacking_targets_are_not_references() {
        let src = "def f(items):\n    a, b = make()\n    for k, v in items:\n        use(k, v)\n";
        let analysis = analyze_python(src);
        let names: Vec<&str> = analysis.references.iter().map(|r| r.name.as_str()).collect();
        assert!(!names.contains(&"a"));
        assert!(!names.contains(&"b"));
        assert!(names.contains(&"items"));
        // `k` and `v` appear once each, as call arguments only.
        assert_eq!(names.iter().filter(|n| **n == "k").count(), 1);
        assert_eq!(names.iter().filter(|n| **n == "v").count(), 1);
    }

    #[test]
    fn reference_context_is_bounded() {
        let long_tail = "x".repeat(200);
        let src = format!("def f():\n    return value + \"{long_tail}\"\n");
        let analysis = analyze_python(&src);
        let value_ref = analysis
            .references
            .iter()
            .find(|r| r.name == "value")
            .unwrap();
        assert!(value_ref.context.contains("value"));
        assert!(value_ref.context.len() <= "value".len() + 2 * REF_CONTEXT_RADIUS);
        assert_eq!(value_ref.line, 2);
    }

    #[test]
    fn malformed_source_yields_empty_analysis() {
        let analysis = analyze_python("def broken(:\n  ???");
        assert!(analysis.definitions.is_empty());
        assert!(analysis.references.is_empty());
        assert!(analysis.calls.is_empty());
    }
}

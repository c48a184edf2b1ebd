//! Structural metadata for AST-derived chunks: signatures, parameters,
//! docstrings, decorators, file imports and the same-file call graph.
//!
//! Every step is additive. A field the dialect cannot read stays empty; no
//! extraction step ever fails a chunk.

use std::collections::{BTreeSet, HashSet};

use tree_sitter::Node;

use crate::chunk::{CallEdge, Chunk};
use crate::dialect::{collapse_whitespace, node_text, DefKind, Definition, Dialect};

/// File-level facts computed once per parsed file.
#[derive(Debug, Clone, Default)]
pub struct FileFacts {
    /// Import statements in source order, whitespace collapsed.
    pub imports: Vec<String>,
    /// Names of every function and method defined anywhere in the file.
    pub callables: BTreeSet<String>,
}

impl FileFacts {
    /// Scan the tree rooted at `root`.
    pub fn collect(dialect: &Dialect, root: Node<'_>, src: &str) -> Self {
        let mut facts = Self::default();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if dialect.is_import(node) {
                facts.imports.push(collapse_whitespace(node_text(node, src)));
                continue;
            }
            if let Some(def) = dialect.definition(node, src) {
                if matches!(def.kind, DefKind::Function | DefKind::Method) {
                    facts.callables.insert(def.name);
                }
            }
            let mut cursor = node.walk();
            let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
        facts
    }
}

/// Fill the declaration metadata of `chunk` from `def`.
pub fn describe(chunk: &mut Chunk, dialect: &Dialect, def: &Definition<'_>, src: &str) {
    chunk.signature = dialect.signature(def, src);
    chunk.parameters = dialect.parameters(def, src);
    chunk.return_type = dialect.return_type(def, src);
    chunk.docstring = dialect.docstring(def, src);
    chunk.decorators = dialect.decorators(def, src);
}

/// Calls under `roots` whose callee is defined in the same file.
///
/// Subtrees whose node id is in `excluded` belong to other chunks and are
/// skipped. The result is ordered by line, then callee, without duplicates.
pub fn collect_calls(
    dialect: &Dialect,
    roots: &[Node<'_>],
    excluded: &HashSet<usize>,
    src: &str,
    callables: &BTreeSet<String>,
) -> Vec<CallEdge> {
    let mut edges = BTreeSet::new();
    let mut stack: Vec<Node<'_>> = roots.to_vec();
    while let Some(node) = stack.pop() {
        if excluded.contains(&node.id()) {
            continue;
        }
        if let Some(callee) = dialect.callee(node, src) {
            if callables.contains(&callee) {
                edges.insert(CallEdge {
                    line: node.start_position().row as u32 + 1,
                    callee,
                });
            }
        }
        let mut cursor = node.walk();
        stack.extend(node.named_children(&mut cursor));
    }
    let mut calls: Vec<CallEdge> = edges.into_iter().collect();
    calls.sort_by(|a, b| a.line.cmp(&b.line).then_with(|| a.callee.cmp(&b.callee)));
    calls
}

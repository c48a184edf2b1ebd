//! Per-language rules for recognising definitions and reading their metadata.
//!
//! Each grammar names its nodes differently; a [`Dialect`] hides those
//! differences behind one extraction contract so the chunker and the
//! metadata extractor stay language-agnostic.

mod c_family;
mod go;
mod java;
mod javascript;
mod python;
mod rust;

pub use c_family::CFamilyDialect;
pub use go::GoDialect;
pub use java::JavaDialect;
pub use javascript::JavaScriptDialect;
pub use python::PythonDialect;
pub use rust::RustDialect;

use codebox_scan::Language;
use tree_sitter::Node;

use crate::chunk::Parameter;

/// Structural role of a recognised definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefKind {
    /// Class-like container: class, struct, trait, impl, interface, namespace.
    Class,
    /// Function; becomes a method when its parent chunk is a class.
    Function,
    /// Declared as a method by the grammar itself.
    Method,
}

/// A definition node recognised by a dialect.
#[derive(Debug, Clone)]
pub struct Definition<'t> {
    /// Structural role.
    pub kind: DefKind,
    /// Declared name.
    pub name: String,
    /// Node holding parameters, return type and body.
    pub node: Node<'t>,
    /// Outermost node, including decorators and export wrappers.
    pub outer: Node<'t>,
    /// Body whose children may hold nested definitions.
    pub body: Option<Node<'t>>,
    /// Byte offset where the signature text begins.
    pub signature_start: usize,
    /// Receiver type of a Go method.
    pub receiver: Option<String>,
}

impl<'t> Definition<'t> {
    /// A definition whose node is also its outer node.
    pub fn new(kind: DefKind, name: String, node: Node<'t>) -> Self {
        Self {
            kind,
            name,
            node,
            outer: node,
            body: node.child_by_field_name("body"),
            signature_start: node.start_byte(),
            receiver: None,
        }
    }

    /// Replace the outer node, keeping everything else.
    pub fn wrapped_in(mut self, outer: Node<'t>) -> Self {
        self.outer = outer;
        self
    }
}

/// Extraction contract every language implements.
pub trait DialectRules: Send + Sync {
    /// Recognise `node` as a definition.
    fn definition<'t>(&self, node: Node<'t>, src: &str) -> Option<Definition<'t>>;

    /// Whether `node` is a file-level import.
    fn is_import(&self, node: Node<'_>) -> bool;

    /// Name of the callee if `node` is a call expression.
    fn callee(&self, node: Node<'_>, src: &str) -> Option<String>;

    /// Ordered parameter list.
    fn parameters(&self, def: &Definition<'_>, src: &str) -> Vec<Parameter>;

    /// Return-type annotation.
    fn return_type(&self, def: &Definition<'_>, src: &str) -> Option<String>;

    /// Doc comment or docstring, verbatim.
    fn docstring(&self, def: &Definition<'_>, src: &str) -> Option<String>;

    /// Decorators, annotations or attributes in source order.
    fn decorators(&self, _def: &Definition<'_>, _src: &str) -> Vec<String> {
        Vec::new()
    }

    /// Nodes that attach to the next sibling instead of standing alone.
    fn is_trivia(&self, node: Node<'_>) -> bool {
        is_comment(node)
    }

    /// Declaration text up to the body, whitespace collapsed.
    fn signature(&self, def: &Definition<'_>, src: &str) -> Option<String> {
        default_signature(def, src)
    }
}

/// Language dispatch over the per-language rule sets.
///
/// # Examples
///
/// ```
/// use codebox_index::dialect::Dialect;
/// use codebox_scan::Language;
///
/// assert!(Dialect::for_language(Language::Python).is_some());
/// assert!(Dialect::for_language(Language::Tsx).is_some());
/// assert!(Dialect::for_language(Language::Markdown).is_none());
/// ```
#[derive(Debug, Clone, Copy)]
pub enum Dialect {
    Python(PythonDialect),
    Rust(RustDialect),
    JavaScript(JavaScriptDialect),
    Go(GoDialect),
    Java(JavaDialect),
    CFamily(CFamilyDialect),
}

impl Dialect {
    /// Rules for `language`, or `None` when it has no grammar.
    pub fn for_language(language: Language) -> Option<Self> {
        let dialect = match language {
            Language::Python => Self::Python(PythonDialect),
            Language::Rust => Self::Rust(RustDialect),
            Language::JavaScript | Language::TypeScript | Language::Tsx => {
                Self::JavaScript(JavaScriptDialect)
            }
            Language::Go => Self::Go(GoDialect),
            Language::Java => Self::Java(JavaDialect),
            Language::C | Language::Cpp => Self::CFamily(CFamilyDialect),
            _ => return None,
        };
        Some(dialect)
    }

    fn rules(&self) -> &dyn DialectRules {
        match self {
            Self::Python(d) => d,
            Self::Rust(d) => d,
            Self::JavaScript(d) => d,
            Self::Go(d) => d,
            Self::Java(d) => d,
            Self::CFamily(d) => d,
        }
    }

    pub fn definition<'t>(&self, node: Node<'t>, src: &str) -> Option<Definition<'t>> {
        self.rules().definition(node, src)
    }

    pub fn is_import(&self, node: Node<'_>) -> bool {
        self.rules().is_import(node)
    }

    pub fn callee(&self, node: Node<'_>, src: &str) -> Option<String> {
        self.rules().callee(node, src)
    }

    pub fn parameters(&self, def: &Definition<'_>, src: &str) -> Vec<Parameter> {
        self.rules().parameters(def, src)
    }

    pub fn return_type(&self, def: &Definition<'_>, src: &str) -> Option<String> {
        self.rules().return_type(def, src)
    }

    pub fn docstring(&self, def: &Definition<'_>, src: &str) -> Option<String> {
        self.rules().docstring(def, src)
    }

    pub fn decorators(&self, def: &Definition<'_>, src: &str) -> Vec<String> {
        self.rules().decorators(def, src)
    }

    pub fn is_trivia(&self, node: Node<'_>) -> bool {
        self.rules().is_trivia(node)
    }

    pub fn signature(&self, def: &Definition<'_>, src: &str) -> Option<String> {
        self.rules().signature(def, src)
    }
}

pub(crate) fn node_text<'s>(node: Node<'_>, src: &'s str) -> &'s str {
    src.get(node.start_byte()..node.end_byte()).unwrap_or("")
}

pub(crate) fn field_text(node: Node<'_>, field: &str, src: &str) -> Option<String> {
    node.child_by_field_name(field)
        .map(|n| node_text(n, src).trim().to_string())
        .filter(|s| !s.is_empty())
}

pub(crate) fn is_comment(node: Node<'_>) -> bool {
    node.kind().contains("comment")
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Last line touched by `node`, 0-based.
pub(crate) fn last_row(node: Node<'_>) -> usize {
    let end = node.end_position();
    if end.column == 0 && end.row > node.start_position().row {
        end.row - 1
    } else {
        end.row
    }
}

pub(crate) fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// Rightmost identifier of a possibly qualified or member expression.
pub(crate) fn terminal_name(node: Node<'_>, src: &str) -> Option<String> {
    match node.kind() {
        "identifier" | "field_identifier" | "property_identifier" | "type_identifier"
        | "private_property_identifier" | "destructor_name" | "operator_name"
        | "shorthand_property_identifier" => {
            let text = node_text(node, src).trim();
            (!text.is_empty()).then(|| text.to_string())
        }
        "attribute" => node.child_by_field_name("attribute").and_then(|n| terminal_name(n, src)),
        "member_expression" => node.child_by_field_name("property").and_then(|n| terminal_name(n, src)),
        "field_expression" | "selector_expression" => {
            node.child_by_field_name("field").and_then(|n| terminal_name(n, src))
        }
        "scoped_identifier" | "qualified_identifier" | "template_function" => {
            node.child_by_field_name("name").and_then(|n| terminal_name(n, src))
        }
        "generic_function" | "generic_type" => node
            .child_by_field_name("function")
            .or_else(|| node.child_by_field_name("type"))
            .and_then(|n| terminal_name(n, src)),
        "scoped_type_identifier" => node.child_by_field_name("name").and_then(|n| terminal_name(n, src)),
        _ => None,
    }
}

fn default_signature(def: &Definition<'_>, src: &str) -> Option<String> {
    let end = match def.body {
        Some(body) => body.start_byte(),
        None => def.node.end_byte(),
    };
    let text = src.get(def.signature_start..end)?;
    let text = match (def.body, text.find('{')) {
        (None, Some(pos)) => &text[..pos],
        _ => text,
    };
    let collapsed = collapse_whitespace(text);
    let trimmed = collapsed
        .trim_end_matches([':', ';', '=', '{'])
        .trim_end_matches("=>")
        .trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Contiguous comments directly above `outer` accepted by `accepts`.
///
/// Siblings matching `skip` (attributes, annotations) may sit between the
/// comments and the definition. A blank line ends the block.
pub(crate) fn leading_doc_comments(
    outer: Node<'_>,
    src: &str,
    accepts: impl Fn(&str) -> bool,
    skip: impl Fn(Node<'_>) -> bool,
) -> Option<String> {
    let mut parts = Vec::new();
    let mut boundary = outer.start_position().row;
    let mut current = outer.prev_named_sibling();
    while let Some(node) = current {
        if last_row(node) + 1 < boundary {
            break;
        }
        if skip(node) {
            boundary = node.start_position().row;
            current = node.prev_named_sibling();
            continue;
        }
        if !is_comment(node) {
            break;
        }
        let text = node_text(node, src);
        if !accepts(text.trim_start()) {
            break;
        }
        parts.push(text.trim_end().to_string());
        boundary = node.start_position().row;
        if text.trim_start().starts_with("/*") {
            break;
        }
        current = node.prev_named_sibling();
    }
    if parts.is_empty() {
        return None;
    }
    parts.reverse();
    Some(parts.join("\n"))
}

/// Preceding siblings matching `is_attr`, in source order.
pub(crate) fn leading_siblings(
    outer: Node<'_>,
    src: &str,
    is_attr: impl Fn(Node<'_>) -> bool,
) -> Vec<String> {
    let mut found = Vec::new();
    let mut current = outer.prev_named_sibling();
    while let Some(node) = current {
        if is_attr(node) {
            found.push(node_text(node, src).trim().to_string());
        } else if !is_comment(node) {
            break;
        }
        current = node.prev_named_sibling();
    }
    found.reverse();
    found
}

/// Strip a leading `:` or `->` from a type annotation node's text.
pub(crate) fn clean_annotation(text: &str) -> Option<String> {
    let cleaned = text
        .trim()
        .trim_start_matches(':')
        .trim_start_matches("->")
        .trim();
    (!cleaned.is_empty()).then(|| collapse_whitespace(cleaned))
}

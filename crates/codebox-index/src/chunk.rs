//! The chunk record shared by the chunker, the store, and the retriever.

use std::fmt;
use std::path::{Path, PathBuf};

use codebox_scan::content_hash;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Structural kind of a chunk.
///
/// # Examples
///
/// ```
/// use codebox_index::chunk::ChunkKind;
///
/// assert_eq!(ChunkKind::Method.as_str(), "method");
/// assert_eq!(ChunkKind::parse("fallback-window"), Some(ChunkKind::FallbackWindow));
/// assert!(ChunkKind::Class.is_definition());
/// assert!(!ChunkKind::Module.is_definition());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkKind {
    /// Module-level statement group.
    Module,
    /// Class, struct, interface, trait, impl block or namespace.
    Class,
    /// Free function.
    Function,
    /// Function defined directly inside a class-like body.
    Method,
    /// Line window produced without a syntax tree.
    FallbackWindow,
}

impl ChunkKind {
    /// Stable identifier stored in the index.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Module => "module",
            ChunkKind::Class => "class",
            ChunkKind::Function => "function",
            ChunkKind::Method => "method",
            ChunkKind::FallbackWindow => "fallback-window",
        }
    }

    /// Inverse of [`ChunkKind::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "module" => Some(ChunkKind::Module),
            "class" => Some(ChunkKind::Class),
            "function" => Some(ChunkKind::Function),
            "method" => Some(ChunkKind::Method),
            "fallback-window" => Some(ChunkKind::FallbackWindow),
            _ => None,
        }
    }

    /// Whether metadata extraction applies to this kind.
    pub fn is_definition(&self) -> bool {
        matches!(self, ChunkKind::Class | ChunkKind::Function | ChunkKind::Method)
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a declaration's parameter list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    /// Parameter name as written, including `*`/`**`/`...` markers.
    pub name: String,
    /// Type annotation, if the source has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_annotation: Option<String>,
    /// Default value expression, if the source has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl Parameter {
    /// A parameter with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_annotation: None,
            default: None,
        }
    }
}

/// A call to a function or method defined in the same file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallEdge {
    /// Name of the called definition.
    pub callee: String,
    /// 1-indexed line of the call site.
    pub line: u32,
}

/// A retrievable fragment of a source file.
///
/// Chunks form an arena keyed by [`Chunk::id`]; nesting is expressed through
/// `parent_id`, never by reference.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use codebox_index::chunk::{Chunk, ChunkKind};
///
/// let chunk = Chunk::new(Path::new("src/app.py"), "python", ChunkKind::Function, "def run(): pass", 1, 1)
///     .with_name("run", "src.app.run");
/// assert_eq!(chunk.full_path, "src.app.run");
/// assert_eq!(chunk.id.len(), 32);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Deterministic id: hash of path, kind, dotted path and content hash.
    pub id: String,
    /// Path of the source file, relative to the project root.
    pub file_path: PathBuf,
    /// Language id of the file.
    pub language: String,
    /// Structural kind.
    pub kind: ChunkKind,
    /// Declared name, absent for statement groups and windows.
    pub name: Option<String>,
    /// Dotted path from the module down to this chunk.
    pub full_path: String,
    /// Id of the enclosing chunk, absent at the top level.
    pub parent_id: Option<String>,
    /// Nesting depth, 0 at the top level.
    pub depth: u32,
    /// First line (1-indexed, inclusive).
    pub start_line: u32,
    /// Last line (1-indexed, inclusive).
    pub end_line: u32,
    /// Declaration text up to the body.
    pub signature: Option<String>,
    /// Ordered parameter list.
    pub parameters: Vec<Parameter>,
    /// Return-type annotation.
    pub return_type: Option<String>,
    /// Doc comment or docstring, verbatim.
    pub docstring: Option<String>,
    /// Decorators, annotations or attributes, in source order.
    pub decorators: Vec<String>,
    /// File-level imports.
    pub imports: Vec<String>,
    /// Calls to definitions of the same file, ordered by line.
    pub calls: Vec<CallEdge>,
    /// Raw text of the chunk. Structural parents elide their children's bodies.
    pub content: String,
    /// SHA-256 of `content`.
    pub content_hash: String,
    /// SHA-256 of the whole file when it was indexed.
    pub file_hash: String,
    /// Embedding vector; absent when the embedding call failed.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    /// Create a chunk without structural metadata.
    ///
    /// The id is derived from the arguments; call [`Chunk::with_name`] or
    /// [`Chunk::with_full_path`] to set the dotted path, which re-derives it.
    pub fn new(
        file_path: &Path,
        language: &str,
        kind: ChunkKind,
        content: &str,
        start_line: u32,
        end_line: u32,
    ) -> Self {
        let content_hash = content_hash(content);
        let full_path = format!("{}@{start_line}", module_path(file_path));
        let mut chunk = Self {
            id: String::new(),
            file_path: file_path.to_path_buf(),
            language: language.to_string(),
            kind,
            name: None,
            full_path,
            parent_id: None,
            depth: 0,
            start_line,
            end_line,
            signature: None,
            parameters: Vec::new(),
            return_type: None,
            docstring: None,
            decorators: Vec::new(),
            imports: Vec::new(),
            calls: Vec::new(),
            content: content.to_string(),
            content_hash,
            file_hash: String::new(),
            embedding: None,
        };
        chunk.refresh_id();
        chunk
    }

    /// Set the declared name and dotted path.
    pub fn with_name(mut self, name: &str, full_path: &str) -> Self {
        self.name = Some(name.to_string());
        self.with_full_path(full_path)
    }

    /// Set the dotted path.
    pub fn with_full_path(mut self, full_path: &str) -> Self {
        self.full_path = full_path.to_string();
        self.refresh_id();
        self
    }

    /// Recompute `id` after the path, kind, or content changed.
    pub fn refresh_id(&mut self) {
        self.id = chunk_id(&self.file_path, self.kind, &self.full_path, &self.content_hash);
    }

    /// Number of lines spanned.
    pub fn line_count(&self) -> u32 {
        self.end_line - self.start_line + 1
    }

    /// Whether `other`'s line range lies within this chunk's range.
    pub fn contains(&self, other: &Chunk) -> bool {
        self.start_line <= other.start_line && other.end_line <= self.end_line
    }

    /// Text sent to the embedding model: a context header, then the content.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::path::Path;
    /// use codebox_index::chunk::{Chunk, ChunkKind};
    ///
    /// let chunk = Chunk::new(Path::new("a.py"), "python", ChunkKind::Function, "def f(): pass", 1, 1)
    ///     .with_name("f", "a.f");
    /// let text = chunk.embedding_text();
    /// assert!(text.starts_with("# File: a.py\n# Type: function\n# Path: a.f"));
    /// assert!(text.ends_with("def f(): pass"));
    /// ```
    pub fn embedding_text(&self) -> String {
        let mut header = format!(
            "# File: {}\n# Type: {}\n# Path: {}",
            self.file_path.display(),
            self.kind,
            self.full_path,
        );
        if let Some(signature) = &self.signature {
            header.push_str(&format!("\n# Signature: {signature}"));
        }
        if let Some(summary) = self.docstring.as_deref().and_then(docstring_summary) {
            header.push_str(&format!("\n# Description: {summary}"));
        }
        format!("{header}\n\n{}", self.content)
    }
}

/// Deterministic chunk id from file path, kind, dotted path and content hash.
pub fn chunk_id(file_path: &Path, kind: ChunkKind, full_path: &str, content_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.to_string_lossy().as_bytes());
    hasher.update([0]);
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(full_path.as_bytes());
    hasher.update([0]);
    hasher.update(content_hash.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

/// Dotted module path of a file: directories and stem joined by `.`.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use codebox_index::chunk::module_path;
///
/// assert_eq!(module_path(Path::new("src/pkg/util.py")), "src.pkg.util");
/// assert_eq!(module_path(Path::new("a.py")), "a");
/// ```
pub fn module_path(file_path: &Path) -> String {
    let without_ext = file_path.with_extension("");
    let parts: Vec<String> = without_ext
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        file_path.to_string_lossy().into_owned()
    } else {
        parts.join(".")
    }
}

/// First meaningful line of a docstring, stripped of quote and comment markers.
///
/// # Examples
///
/// ```
/// use codebox_index::chunk::docstring_summary;
///
/// assert_eq!(docstring_summary("\"\"\"Add two numbers.\n\nLonger.\"\"\"").as_deref(), Some("Add two numbers."));
/// assert_eq!(docstring_summary("/**\n * Parse input.\n */").as_deref(), Some("Parse input."));
/// assert_eq!(docstring_summary("/// Run it."), Some("Run it.".to_string()));
/// assert_eq!(docstring_summary("\"\"\"\"\"\""), None);
/// ```
pub fn docstring_summary(doc: &str) -> Option<String> {
    doc.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(['r', 'u', 'b', 'f'])
                .trim_start_matches("\"\"\"")
                .trim_start_matches("'''")
                .trim_start_matches("/**")
                .trim_start_matches("///")
                .trim_start_matches("//")
                .trim_start_matches("/*")
                .trim_start_matches('*')
                .trim_end_matches("*/")
                .trim_end_matches("\"\"\"")
                .trim_end_matches("'''")
                .trim_matches(['"', '\''])
                .trim()
                .to_string()
        })
        .find(|line| !line.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_stable_for_identical_inputs() {
        let a = Chunk::new(Path::new("x.py"), "python", ChunkKind::Function, "def f(): pass", 3, 3)
            .with_name("f", "x.f");
        let b = Chunk::new(Path::new("x.py"), "python", ChunkKind::Function, "def f(): pass", 3, 3)
            .with_name("f", "x.f");
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn id_changes_with_each_component() {
        let base = chunk_id(Path::new("x.py"), ChunkKind::Function, "x.f", "h1");
        assert_ne!(base, chunk_id(Path::new("y.py"), ChunkKind::Function, "x.f", "h1"));
        assert_ne!(base, chunk_id(Path::new("x.py"), ChunkKind::Method, "x.f", "h1"));
        assert_ne!(base, chunk_id(Path::new("x.py"), ChunkKind::Function, "x.g", "h1"));
        assert_ne!(base, chunk_id(Path::new("x.py"), ChunkKind::Function, "x.f", "h2"));
    }

    #[test]
    fn unnamed_chunks_use_line_anchored_path() {
        let chunk = Chunk::new(Path::new("lib/tool.sh"), "shell", ChunkKind::FallbackWindow, "echo", 41, 80);
        assert_eq!(chunk.full_path, "lib.tool@41");
        assert!(chunk.name.is_none());
        assert_eq!(chunk.line_count(), 40);
    }

    #[test]
    fn embedding_text_includes_docstring_summary() {
        let mut chunk = Chunk::new(Path::new("m.py"), "python", ChunkKind::Function, "def g(): ...", 1, 1)
            .with_name("g", "m.g");
        chunk.signature = Some("def g():".into());
        chunk.docstring = Some("\"\"\"Compute g.\"\"\"".into());
        let text = chunk.embedding_text();
        assert!(text.contains("# Signature: def g():"), "{text}");
        assert!(text.contains("# Description: Compute g."), "{text}");
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [
            ChunkKind::Module,
            ChunkKind::Class,
            ChunkKind::Function,
            ChunkKind::Method,
            ChunkKind::FallbackWindow,
        ] {
            assert_eq!(ChunkKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ChunkKind::parse("struct"), None);
    }

    #[test]
    fn embedding_is_not_serialized() {
        let mut chunk = Chunk::new(Path::new("a.rs"), "rust", ChunkKind::Function, "fn a() {}", 1, 1);
        chunk.embedding = Some(vec![1.0, 0.0]);
        let json = serde_json::to_value(&chunk).unwrap();
        assert!(json.get("embedding").is_none());
        assert_eq!(json["kind"], "function");
        assert_eq!(json["startLine"], 1);
    }
}

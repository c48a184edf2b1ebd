//! AST-aware chunking with a line-window fallback.
//!
//! Top-level definitions and runs of non-definition statements become
//! depth-0 chunks that tile the file. Definitions larger than the profile's
//! maximum are split: nested definitions become child chunks, otherwise the
//! body is cut into statement-aligned windows. Files without a grammar, or
//! whose parse contains syntax errors, are cut into overlapping line windows.

use std::collections::{HashMap, HashSet};

use codebox_core::ProfileParams;
use codebox_scan::SourceFile;
use tree_sitter::{Node, Parser, Tree};

use crate::chunk::{module_path, Chunk, ChunkKind};
use crate::dialect::{last_row, named_children, DefKind, Definition, Dialect};
use crate::metadata::{self, FileFacts};

/// Bodies that only wrap the real statement list.
const STATEMENT_CONTAINERS: &[&str] = &[
    "block",
    "statement_block",
    "statement_list",
    "compound_statement",
    "declaration_list",
    "field_declaration_list",
];

/// Chunks of one file.
#[derive(Debug, Clone, Default)]
pub struct ChunkedFile {
    /// Chunks in pre-order: every parent precedes its children.
    pub chunks: Vec<Chunk>,
    /// Whether an AST-capable file fell back to line windows.
    pub degraded: bool,
}

/// Chunk one source file under the given profile parameters.
///
/// Never fails: a file whose parse is unusable degrades to line windows and
/// is flagged through [`ChunkedFile::degraded`].
///
/// # Examples
///
/// ```
/// use codebox_core::ProfileConfig;
/// use codebox_index::chunk::ChunkKind;
/// use codebox_index::chunker::chunk_source;
/// use codebox_scan::{Language, SourceFile};
///
/// let file = SourceFile::from_text("a.py", Language::Python, "def foo(a, b):\n    return a + b\n");
/// let out = chunk_source(&file, &ProfileConfig::default().medium);
/// assert_eq!(out.chunks.len(), 1);
/// assert_eq!(out.chunks[0].kind, ChunkKind::Function);
/// assert_eq!(out.chunks[0].full_path, "a.foo");
/// assert!(!out.degraded);
/// ```
pub fn chunk_source(file: &SourceFile, params: &ProfileParams) -> ChunkedFile {
    if file.content.trim().is_empty() {
        return ChunkedFile::default();
    }
    let Some(dialect) = Dialect::for_language(file.language) else {
        return ChunkedFile {
            chunks: fallback_windows(file, params),
            degraded: false,
        };
    };
    let Some(tree) = parse(file) else {
        tracing::debug!(path = %file.path.display(), "unusable parse, using line windows");
        return ChunkedFile {
            chunks: fallback_windows(file, params),
            degraded: true,
        };
    };

    let root = tree.root_node();
    let mut emitter = Emitter {
        file,
        src: &file.content,
        lines: file.content.lines().collect(),
        dialect,
        params,
        module: module_path(&file.path),
        facts: FileFacts::collect(&dialect, root, &file.content),
        seen: HashMap::new(),
        chunks: Vec::new(),
    };
    emitter.emit_file(root);
    ChunkedFile {
        chunks: emitter.chunks,
        degraded: false,
    }
}

fn parse(file: &SourceFile) -> Option<Tree> {
    let grammar = file.language.tree_sitter_language()?;
    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(&grammar) {
        tracing::warn!(language = %file.language, error = %e, "failed to load grammar");
        return None;
    }
    let tree = parser.parse(&file.content, None)?;
    if tree.root_node().has_error() {
        return None;
    }
    Some(tree)
}

/// Fixed-size overlapping line windows with no structural metadata.
///
/// # Examples
///
/// ```
/// use codebox_core::ProfileParams;
/// use codebox_index::chunker::fallback_windows;
/// use codebox_scan::{Language, SourceFile};
///
/// let text: String = (1..=10).map(|i| format!("line {i}\n")).collect();
/// let file = SourceFile::from_text("notes.md", Language::Markdown, &text);
/// let params = ProfileParams { max_chunk_lines: 20, min_chunk_lines: 1, window_lines: 4, window_overlap: 1, dimension: None };
/// let windows = fallback_windows(&file, &params);
/// let ranges: Vec<_> = windows.iter().map(|c| (c.start_line, c.end_line)).collect();
/// assert_eq!(ranges, vec![(1, 4), (4, 7), (7, 10)]);
/// ```
pub fn fallback_windows(file: &SourceFile, params: &ProfileParams) -> Vec<Chunk> {
    let lines: Vec<&str> = file.content.lines().collect();
    let window = params.window_lines.max(1);
    let step = window.saturating_sub(params.window_overlap).max(1);
    let language = file.language.id();
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < lines.len() {
        let end = (start + window).min(lines.len());
        let content = lines[start..end].join("\n");
        if !content.trim().is_empty() {
            let mut chunk = Chunk::new(
                &file.path,
                language,
                ChunkKind::FallbackWindow,
                &content,
                start as u32 + 1,
                end as u32,
            );
            chunk.file_hash = file.content_hash.clone();
            chunks.push(chunk);
        }
        if end == lines.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[derive(Debug)]
enum Piece<'t> {
    Definition(Definition<'t>),
    Statements,
}

/// A depth-0 region, rows 0-based and inclusive.
#[derive(Debug)]
struct Segment<'t> {
    piece: Piece<'t>,
    start: usize,
    end: usize,
}

impl Segment<'_> {
    fn len(&self) -> usize {
        self.end - self.start + 1
    }
}

/// A planned child of an oversized definition.
enum Child<'t> {
    Definition {
        def: Definition<'t>,
        start: usize,
        end: usize,
    },
    Window {
        nodes: Vec<Node<'t>>,
        start: usize,
        end: usize,
    },
}

impl<'t> Child<'t> {
    fn range(&self) -> (usize, usize) {
        match self {
            Child::Definition { start, end, .. } | Child::Window { start, end, .. } => {
                (*start, *end)
            }
        }
    }

    fn node_ids(&self) -> Vec<usize> {
        match self {
            Child::Definition { def, .. } => vec![def.outer.id()],
            Child::Window { nodes, .. } => nodes.iter().map(|n| n.id()).collect(),
        }
    }
}

/// The chunk a child is emitted under.
struct Scope {
    id: String,
    full_path: String,
    kind: ChunkKind,
}

struct Emitter<'a> {
    file: &'a SourceFile,
    src: &'a str,
    lines: Vec<&'a str>,
    dialect: Dialect,
    params: &'a ProfileParams,
    module: String,
    facts: FileFacts,
    seen: HashMap<String, usize>,
    chunks: Vec<Chunk>,
}

impl<'a> Emitter<'a> {
    fn emit_file(&mut self, root: Node<'_>) {
        let last = self.lines.len().saturating_sub(1);
        let mut segments = self.segments(root);
        if segments.is_empty() {
            segments.push(Segment {
                piece: Piece::Statements,
                start: 0,
                end: last,
            });
        }
        tile(&mut segments, last);
        let segments = merge_trivial(segments, self.params.min_chunk_lines);
        for segment in segments {
            match segment.piece {
                Piece::Definition(def) => {
                    self.emit_definition(&def, segment.start, segment.end, None, 0);
                }
                Piece::Statements => {
                    let content = self.text(segment.start, segment.end);
                    let chunk = self.base_chunk(ChunkKind::Module, segment.start, segment.end, &content);
                    self.push(chunk);
                }
            }
        }
    }

    fn segments<'t>(&self, root: Node<'t>) -> Vec<Segment<'t>> {
        let mut segments: Vec<Segment<'t>> = Vec::new();
        for child in named_children(root) {
            if self.dialect.is_trivia(child) {
                continue;
            }
            let start = child.start_position().row;
            let end = last_row(child);
            if let Some(prev) = segments.last_mut() {
                if start <= prev.end {
                    prev.end = prev.end.max(end);
                    continue;
                }
            }
            match self.dialect.definition(child, self.src) {
                Some(def) => segments.push(Segment {
                    piece: Piece::Definition(def),
                    start,
                    end,
                }),
                None => {
                    let extends = matches!(
                        segments.last(),
                        Some(prev) if matches!(prev.piece, Piece::Statements)
                            && end - prev.start < self.params.max_chunk_lines
                    );
                    match segments.last_mut() {
                        Some(prev) if extends => prev.end = end,
                        _ => segments.push(Segment {
                            piece: Piece::Statements,
                            start,
                            end,
                        }),
                    }
                }
            }
        }
        segments
    }

    fn emit_definition(
        &mut self,
        def: &Definition<'_>,
        start: usize,
        end: usize,
        parent: Option<&Scope>,
        depth: u32,
    ) {
        let kind = match def.kind {
            DefKind::Class => ChunkKind::Class,
            DefKind::Method => ChunkKind::Method,
            DefKind::Function => match parent {
                Some(scope) if scope.kind == ChunkKind::Class => ChunkKind::Method,
                _ => ChunkKind::Function,
            },
        };
        let full_path = match (parent, &def.receiver) {
            (Some(scope), _) => format!("{}.{}", scope.full_path, def.name),
            (None, Some(receiver)) => format!("{}.{receiver}.{}", self.module, def.name),
            (None, None) => format!("{}.{}", self.module, def.name),
        };

        let children = if end - start + 1 > self.params.max_chunk_lines {
            self.plan_children(def)
        } else {
            Vec::new()
        };
        let content = if children.is_empty() {
            self.text(start, end)
        } else {
            self.elide(start, end, &children)
        };

        let mut chunk = self
            .base_chunk(kind, start, end, &content)
            .with_name(&def.name, &full_path);
        chunk.parent_id = parent.map(|p| p.id.clone());
        chunk.depth = depth;
        metadata::describe(&mut chunk, &self.dialect, def, self.src);
        let excluded: HashSet<usize> = children.iter().flat_map(|c| c.node_ids()).collect();
        chunk.calls = metadata::collect_calls(
            &self.dialect,
            &[def.outer],
            &excluded,
            self.src,
            &self.facts.callables,
        );
        let id = self.push(chunk);

        let scope = Scope {
            id,
            full_path,
            kind,
        };
        for child in &children {
            match child {
                Child::Definition { def, start, end } => {
                    self.emit_definition(def, *start, *end, Some(&scope), depth + 1);
                }
                Child::Window { nodes, start, end } => {
                    let text = self.text(*start, *end);
                    let mut chunk = self
                        .base_chunk(ChunkKind::FallbackWindow, *start, *end, &text)
                        .with_full_path(&format!("{}@{}", scope.full_path, start + 1));
                    chunk.parent_id = Some(scope.id.clone());
                    chunk.depth = depth + 1;
                    chunk.calls = metadata::collect_calls(
                        &self.dialect,
                        nodes,
                        &HashSet::new(),
                        self.src,
                        &self.facts.callables,
                    );
                    self.push(chunk);
                }
            }
        }
    }

    fn plan_children<'t>(&self, def: &Definition<'t>) -> Vec<Child<'t>> {
        let Some(body) = def.body else {
            return Vec::new();
        };
        let nested = self.nested_definitions(body);
        if !nested.is_empty() {
            return nested;
        }
        let runs = self.statement_runs(body);
        if runs.len() > 1 {
            runs
        } else {
            Vec::new()
        }
    }

    /// Definitions directly inside `body`, each widened to the comments and
    /// attributes right above it.
    fn nested_definitions<'t>(&self, body: Node<'t>) -> Vec<Child<'t>> {
        let mut found = Vec::new();
        let mut lead: Option<usize> = None;
        let mut prev_end: Option<usize> = None;
        for child in named_children(body) {
            if self.dialect.is_trivia(child) {
                lead.get_or_insert(child.start_position().row);
                continue;
            }
            let row = child.start_position().row;
            let floor = prev_end.map_or(0, |p| p + 1);
            if row >= floor {
                if let Some(def) = self.dialect.definition(child, self.src) {
                    let start = lead.map_or(row, |l| l.max(floor)).min(row);
                    found.push(Child::Definition {
                        def,
                        start,
                        end: last_row(child),
                    });
                }
            }
            lead = None;
            prev_end = Some(prev_end.map_or(last_row(child), |p| p.max(last_row(child))));
        }
        found
    }

    /// Statement-aligned runs of at most `max_chunk_lines` lines.
    fn statement_runs<'t>(&self, body: Node<'t>) -> Vec<Child<'t>> {
        let container = statement_container(body);
        let max = self.params.max_chunk_lines;
        let mut runs: Vec<Child<'t>> = Vec::new();
        for stmt in named_children(container) {
            let s = stmt.start_position().row;
            let e = last_row(stmt);
            if let Some(Child::Window { nodes, start, end }) = runs.last_mut() {
                if s <= *end || e.max(*end) - *start < max {
                    nodes.push(stmt);
                    *end = (*end).max(e);
                    continue;
                }
            }
            runs.push(Child::Window {
                nodes: vec![stmt],
                start: s,
                end: e,
            });
        }
        runs
    }

    /// Parent text with each child's body replaced by `...`.
    fn elide(&self, start: usize, end: usize, children: &[Child<'_>]) -> String {
        let mut out: Vec<String> = Vec::new();
        let mut row = start;
        for child in children {
            let (child_start, child_end) = child.range();
            out.extend(self.lines[row..child_start].iter().map(|l| l.to_string()));
            match child {
                Child::Definition { def, .. } => {
                    let header_row = def.node.start_position().row.clamp(child_start, child_end);
                    let header = self.lines[header_row];
                    out.push(header.to_string());
                    out.push(format!("{}    ...", indent_of(header)));
                }
                Child::Window { .. } => {
                    out.push(format!("{}...", indent_of(self.lines[child_start])));
                }
            }
            row = child_end + 1;
        }
        if row <= end {
            out.extend(self.lines[row..=end].iter().map(|l| l.to_string()));
        }
        out.join("\n")
    }

    fn text(&self, start: usize, end: usize) -> String {
        let end = end.min(self.lines.len().saturating_sub(1));
        self.lines[start..=end].join("\n")
    }

    fn base_chunk(&self, kind: ChunkKind, start: usize, end: usize, content: &str) -> Chunk {
        let mut chunk = Chunk::new(
            &self.file.path,
            self.file.language.id(),
            kind,
            content,
            start as u32 + 1,
            end as u32 + 1,
        );
        chunk.file_hash = self.file.content_hash.clone();
        chunk.imports = self.facts.imports.clone();
        chunk
    }

    /// Store `chunk`, suffixing its id when an identical chunk already exists.
    fn push(&mut self, mut chunk: Chunk) -> String {
        let count = self.seen.entry(chunk.id.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            chunk.id = format!("{}#{}", chunk.id, count);
        }
        let id = chunk.id.clone();
        self.chunks.push(chunk);
        id
    }
}

/// Give every segment the lines between it and its predecessor, and let the
/// last one run to the end of the file.
fn tile(segments: &mut [Segment<'_>], last: usize) {
    let mut next_start = 0;
    for segment in segments.iter_mut() {
        segment.start = next_start;
        next_start = segment.end + 1;
    }
    if let Some(tail) = segments.last_mut() {
        tail.end = tail.end.max(last);
    }
}

/// Fold statement groups shorter than `min` into the following segment, or
/// into the preceding one when nothing follows. Definitions never move.
fn merge_trivial(segments: Vec<Segment<'_>>, min: usize) -> Vec<Segment<'_>> {
    let total = segments.len();
    let mut out: Vec<Segment<'_>> = Vec::with_capacity(total);
    let mut carried: Option<usize> = None;
    for (i, mut segment) in segments.into_iter().enumerate() {
        if let Some(start) = carried.take() {
            segment.start = start;
        }
        let trivial = matches!(segment.piece, Piece::Statements) && segment.len() < min;
        if trivial && i + 1 < total {
            carried = Some(segment.start);
            continue;
        }
        if trivial {
            if let Some(prev) = out.last_mut() {
                prev.end = segment.end;
                continue;
            }
        }
        out.push(segment);
    }
    out
}

fn statement_container(body: Node<'_>) -> Node<'_> {
    let mut current = body;
    loop {
        let children = named_children(current);
        match children.as_slice() {
            [only] if STATEMENT_CONTAINERS.contains(&only.kind()) => current = *only,
            _ => return current,
        }
    }
}

fn indent_of(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

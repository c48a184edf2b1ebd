//! Shaping ranked chunks for output.
//!
//! [`shape`] turns a chunk into a [`ChunkPayload`] for one output mode;
//! [`render_search`] prints a whole response as text, Markdown or JSON.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use codebox_core::{OutputConfig, OutputFormat, OutputMode, Result};
use codebox_scan::content_hash;
use serde::{Deserialize, Serialize};

use crate::chunk::{docstring_summary, CallEdge, Chunk, ChunkKind, Parameter};
use crate::search::SearchResponse;

/// How much of each chunk to return.
///
/// # Examples
///
/// ```
/// use codebox_core::{OutputConfig, OutputMode};
/// use codebox_index::format::OutputOptions;
///
/// let options = OutputOptions::from_config(&OutputConfig::default());
/// assert_eq!(options.mode, OutputMode::Standard);
/// assert_eq!(options.preview_length, 200);
/// assert_eq!(options.context, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputOptions {
    /// Verbosity.
    pub mode: OutputMode,
    /// Waive the soft content cap in verbose mode.
    pub full_content: bool,
    /// Characters of preview in compact and standard modes.
    pub preview_length: usize,
    /// Lines of surrounding source to include.
    pub context: usize,
    /// Soft content cap in verbose mode.
    pub max_content_length: usize,
    /// Hard content cap, applied even with `full_content`.
    pub hard_max_content_length: usize,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self::from_config(&OutputConfig::default())
    }
}

impl OutputOptions {
    /// Options from the `[output]` config section.
    pub fn from_config(config: &OutputConfig) -> Self {
        Self {
            mode: OutputMode::default(),
            full_content: false,
            preview_length: config.preview_length,
            context: 0,
            max_content_length: config.max_content_length,
            hard_max_content_length: config.hard_max_content_length,
        }
    }

    fn content_cap(&self) -> usize {
        if self.full_content {
            self.hard_max_content_length
        } else {
            self.max_content_length.min(self.hard_max_content_length)
        }
    }
}

/// One source line with its line number in the original file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberedLine {
    /// 1-indexed line number.
    pub line: u32,
    /// Line text without the newline.
    pub text: String,
}

/// A chunk shaped for output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPayload {
    pub file_path: PathBuf,
    pub start_line: u32,
    pub end_line: u32,
    pub kind: ChunkKind,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub full_path: String,
    /// Leading characters of the chunk; absent in verbose mode.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub preview: Vec<NumberedLine>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub preview_truncated: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    /// First line of the docstring.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub decorators: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<CallEdge>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Full chunk text, capped; verbose mode only.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<NumberedLine>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub content_truncated: bool,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context_before: Vec<NumberedLine>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context_after: Vec<NumberedLine>,
    /// Why something requested could not be included.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Cut `text` to at most `max_chars` characters, never inside a code point.
///
/// # Examples
///
/// ```
/// use codebox_index::format::truncate_chars;
///
/// assert_eq!(truncate_chars("héllo", 2), ("hé", true));
/// assert_eq!(truncate_chars("hi", 10), ("hi", false));
/// ```
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => (&text[..byte], true),
        None => (text, false),
    }
}

/// Split `text` into lines numbered from `first_line`.
pub fn numbered(text: &str, first_line: u32) -> Vec<NumberedLine> {
    text.lines()
        .enumerate()
        .map(|(i, line)| NumberedLine {
            line: first_line + i as u32,
            text: line.to_string(),
        })
        .collect()
}

/// Shape `chunk` for `options`, reading surrounding lines from `root` when
/// context is requested.
///
/// A file that changed or disappeared since indexing yields the chunk
/// without context and a note.
pub fn shape(chunk: &Chunk, options: &OutputOptions, root: &Path) -> ChunkPayload {
    let mut payload = ChunkPayload {
        file_path: chunk.file_path.clone(),
        start_line: chunk.start_line,
        end_line: chunk.end_line,
        kind: chunk.kind,
        language: chunk.language.clone(),
        name: chunk.name.clone(),
        full_path: chunk.full_path.clone(),
        preview: Vec::new(),
        preview_truncated: false,
        signature: None,
        return_type: None,
        summary: None,
        docstring: None,
        parameters: Vec::new(),
        decorators: Vec::new(),
        imports: Vec::new(),
        calls: Vec::new(),
        parent_id: None,
        content: Vec::new(),
        content_truncated: false,
        context_before: Vec::new(),
        context_after: Vec::new(),
        note: None,
    };

    if options.mode >= OutputMode::Standard {
        payload.signature = chunk.signature.clone();
        payload.return_type = chunk.return_type.clone();
        payload.summary = chunk.docstring.as_deref().and_then(docstring_summary);
    }

    if options.mode == OutputMode::Verbose {
        let (content, truncated) = truncate_chars(&chunk.content, options.content_cap());
        payload.content = numbered(content, chunk.start_line);
        payload.content_truncated = truncated;
        payload.docstring = chunk.docstring.clone();
        payload.parameters = chunk.parameters.clone();
        payload.decorators = chunk.decorators.clone();
        payload.imports = chunk.imports.clone();
        payload.calls = chunk.calls.clone();
        payload.parent_id = chunk.parent_id.clone();
    } else {
        let (preview, truncated) = truncate_chars(&chunk.content, options.preview_length);
        payload.preview = numbered(preview, chunk.start_line);
        payload.preview_truncated = truncated;
    }

    if options.context > 0 {
        attach_context(&mut payload, chunk, options.context, root);
    }
    payload
}

fn attach_context(payload: &mut ChunkPayload, chunk: &Chunk, context: usize, root: &Path) {
    let path = root.join(&chunk.file_path);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "context unavailable");
            payload.note = Some("source file no longer readable; context omitted".into());
            return;
        }
    };
    if content_hash(&text) != chunk.file_hash {
        payload.note = Some("source file changed since indexing; context omitted".into());
        return;
    }

    let lines: Vec<&str> = text.lines().collect();
    let before_to = (chunk.start_line as usize).saturating_sub(1).min(lines.len());
    let before_from = before_to.saturating_sub(context);
    let end = (chunk.end_line as usize).min(lines.len());
    payload.context_before = lines[before_from..before_to]
        .iter()
        .enumerate()
        .map(|(i, line)| NumberedLine {
            line: (before_from + i + 1) as u32,
            text: line.to_string(),
        })
        .collect();
    let after_to = (end + context).min(lines.len());
    payload.context_after = lines[end.min(after_to)..after_to]
        .iter()
        .enumerate()
        .map(|(i, line)| NumberedLine {
            line: (end + i + 1) as u32,
            text: line.to_string(),
        })
        .collect();
}

/// Render a search response.
///
/// # Errors
///
/// Returns [`codebox_core::CodeboxError::Serialization`] if JSON encoding fails.
pub fn render_search(response: &SearchResponse, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(response)?),
        OutputFormat::Markdown => Ok(render_markdown(response)),
        OutputFormat::Text => Ok(render_text(response)),
    }
}

fn push_lines(out: &mut String, lines: &[NumberedLine], marker: &str) {
    let width = lines
        .last()
        .map(|l| l.line.to_string().len())
        .unwrap_or(1);
    for line in lines {
        let _ = writeln!(out, "  {:>width$} {marker} {}", line.line, line.text);
    }
}

fn render_text(response: &SearchResponse) -> String {
    let mut out = String::new();
    if response.results.is_empty() {
        let _ = writeln!(out, "No results for '{}'.", response.query);
    }
    for result in &response.results {
        let p = &result.payload;
        let label = p.name.as_deref().unwrap_or(&p.full_path);
        let _ = writeln!(
            out,
            "{}. {}:{}-{} {} ({}) score {:.4}",
            result.rank,
            p.file_path.display(),
            p.start_line,
            p.end_line,
            label,
            p.kind,
            result.score
        );
        if let Some(signature) = &p.signature {
            let _ = writeln!(out, "   {signature}");
        }
        if let Some(return_type) = &p.return_type {
            let _ = writeln!(out, "   returns: {return_type}");
        }
        if let Some(summary) = &p.summary {
            let _ = writeln!(out, "   {summary}");
        }
        if !p.parameters.is_empty() {
            let params: Vec<String> = p.parameters.iter().map(format_parameter).collect();
            let _ = writeln!(out, "   params: {}", params.join(", "));
        }
        if !p.decorators.is_empty() {
            let _ = writeln!(out, "   decorators: {}", p.decorators.join(" "));
        }
        if !p.calls.is_empty() {
            let calls: Vec<String> = p
                .calls
                .iter()
                .map(|c| format!("{}@{}", c.callee, c.line))
                .collect();
            let _ = writeln!(out, "   calls: {}", calls.join(", "));
        }
        if !p.imports.is_empty() {
            let _ = writeln!(out, "   imports: {}", p.imports.len());
        }
        push_lines(&mut out, &p.context_before, ":");
        push_lines(&mut out, &p.preview, "|");
        if p.preview_truncated {
            let _ = writeln!(out, "  ...");
        }
        push_lines(&mut out, &p.content, "|");
        if p.content_truncated {
            let _ = writeln!(out, "  ... (truncated, use --full-content)");
        }
        push_lines(&mut out, &p.context_after, ":");
        if let Some(note) = &p.note {
            let _ = writeln!(out, "   note: {note}");
        }
        out.push('\n');
    }
    if response.unembedded_chunks > 0 && response.mode.needs_vectors() {
        let _ = writeln!(
            out,
            "{} chunk(s) have no embedding and were ranked by keyword only.",
            response.unembedded_chunks
        );
    }
    out
}

fn render_markdown(response: &SearchResponse) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Search: {}\n", response.query);
    let _ = writeln!(
        out,
        "_{} mode, {} result(s), generation {}_\n",
        response.mode,
        response.results.len(),
        response.generation_id
    );
    for result in &response.results {
        let p = &result.payload;
        let label = p.name.as_deref().unwrap_or(&p.full_path);
        let _ = writeln!(
            out,
            "## {}. `{}` ({})\n\n`{}:{}-{}` score {:.4}\n",
            result.rank,
            label,
            p.kind,
            p.file_path.display(),
            p.start_line,
            p.end_line,
            result.score
        );
        if let Some(signature) = &p.signature {
            let _ = writeln!(out, "**Signature:** `{signature}`\n");
        }
        if let Some(summary) = &p.summary {
            let _ = writeln!(out, "> {summary}\n");
        }
        if !p.calls.is_empty() {
            let calls: Vec<String> = p
                .calls
                .iter()
                .map(|c| format!("`{}` (line {})", c.callee, c.line))
                .collect();
            let _ = writeln!(out, "**Calls:** {}\n", calls.join(", "));
        }
        let body = if p.content.is_empty() { &p.preview } else { &p.content };
        let _ = writeln!(out, "```{}", p.language);
        for line in p.context_before.iter().chain(body).chain(&p.context_after) {
            let _ = writeln!(out, "{:>5}  {}", line.line, line.text);
        }
        let _ = writeln!(out, "```\n");
        if let Some(note) = &p.note {
            let _ = writeln!(out, "_Note: {note}_\n");
        }
    }
    out
}

fn format_parameter(p: &Parameter) -> String {
    let mut text = p.name.clone();
    if let Some(ty) = &p.type_annotation {
        let _ = write!(text, ": {ty}");
    }
    if let Some(default) = &p.default {
        let _ = write!(text, " = {default}");
    }
    text
}

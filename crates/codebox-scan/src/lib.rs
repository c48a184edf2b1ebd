//! File discovery and language resolution for codebox.
//!
//! Walks a project with the `ignore` crate (honouring `.gitignore` and the
//! configured ignore globs) and resolves every file to a [`language::Language`]
//! plus an AST-capability flag. Resolution goes extension table, then content
//! guessing, then plain text, and never fails.

pub mod language;
pub mod walker;

pub use language::{guess_language, resolve, Language, Resolution};
pub use walker::{content_hash, enumerate_files, read_source_file, SourceFile, WalkOptions};

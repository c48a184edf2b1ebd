//! Language resolution: extension table first, content guessing second,
//! plain text last.

use std::path::Path;

use serde::Serialize;

/// Bytes of content inspected when guessing a language.
pub const SAMPLE_SIZE: usize = 4096;

/// A language known to codebox.
///
/// Only some languages have a tree-sitter grammar; the rest are indexed
/// through line windows.
///
/// # Examples
///
/// ```
/// use codebox_scan::language::Language;
///
/// assert_eq!(Language::from_extension("rs"), Some(Language::Rust));
/// assert_eq!(Language::from_extension("py"), Some(Language::Python));
/// assert_eq!(Language::from_extension("tsx"), Some(Language::Tsx));
/// assert_eq!(Language::from_extension("md"), Some(Language::Markdown));
/// assert_eq!(Language::from_extension("xyz"), None);
/// assert!(Language::Go.is_ast_capable());
/// assert!(!Language::Markdown.is_ast_capable());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    Python,
    TypeScript,
    Tsx,
    JavaScript,
    Go,
    Java,
    C,
    Cpp,
    CSharp,
    Ruby,
    Php,
    Kotlin,
    Swift,
    Scala,
    Lua,
    Shell,
    Sql,
    Html,
    Css,
    Markdown,
    Json,
    Yaml,
    Toml,
    Xml,
    Text,
}

impl Language {
    /// Detect language from a file extension string (without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        let lang = match ext.to_ascii_lowercase().as_str() {
            "rs" => Language::Rust,
            "py" | "pyi" | "pyw" => Language::Python,
            "ts" | "mts" | "cts" => Language::TypeScript,
            "tsx" => Language::Tsx,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "go" => Language::Go,
            "java" => Language::Java,
            "c" | "h" => Language::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" | "hh" => Language::Cpp,
            "cs" => Language::CSharp,
            "rb" => Language::Ruby,
            "php" => Language::Php,
            "kt" | "kts" => Language::Kotlin,
            "swift" => Language::Swift,
            "scala" | "sc" => Language::Scala,
            "lua" => Language::Lua,
            "sh" | "bash" | "zsh" => Language::Shell,
            "sql" => Language::Sql,
            "html" | "htm" => Language::Html,
            "css" | "scss" => Language::Css,
            "md" | "markdown" => Language::Markdown,
            "json" => Language::Json,
            "yaml" | "yml" => Language::Yaml,
            "toml" => Language::Toml,
            "xml" => Language::Xml,
            "txt" | "text" => Language::Text,
            _ => return None,
        };
        Some(lang)
    }

    /// Detect language from a well-known file name without a useful extension.
    pub fn from_file_name(name: &str) -> Option<Self> {
        match name {
            "Dockerfile" | "Makefile" | "makefile" | "GNUmakefile" => Some(Language::Shell),
            "Cargo.lock" | "Pipfile" => Some(Language::Toml),
            "CMakeLists.txt" => Some(Language::Text),
            _ => None,
        }
    }

    /// Map a language name as it appears in shebangs and editor modelines.
    ///
    /// # Examples
    ///
    /// ```
    /// use codebox_scan::language::Language;
    ///
    /// assert_eq!(Language::from_name("python3"), Some(Language::Python));
    /// assert_eq!(Language::from_name("c++"), Some(Language::Cpp));
    /// assert_eq!(Language::from_name("brainfuck"), None);
    /// ```
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        let base = name.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.');
        let lang = match base {
            "rust" => Language::Rust,
            "python" | "py" => Language::Python,
            "typescript" | "ts" => Language::TypeScript,
            "tsx" | "typescriptreact" => Language::Tsx,
            "javascript" | "js" | "node" | "nodejs" | "deno" | "bun" => Language::JavaScript,
            "go" | "golang" => Language::Go,
            "java" => Language::Java,
            "c" => Language::C,
            "cpp" | "c++" => Language::Cpp,
            "csharp" | "cs" => Language::CSharp,
            "ruby" | "rb" => Language::Ruby,
            "php" => Language::Php,
            "kotlin" => Language::Kotlin,
            "swift" => Language::Swift,
            "scala" => Language::Scala,
            "lua" => Language::Lua,
            "sh" | "bash" | "zsh" | "shell" | "dash" => Language::Shell,
            "sql" => Language::Sql,
            "html" => Language::Html,
            "css" => Language::Css,
            "markdown" | "md" => Language::Markdown,
            "json" => Language::Json,
            "yaml" => Language::Yaml,
            "toml" => Language::Toml,
            "xml" => Language::Xml,
            _ => return None,
        };
        Some(lang)
    }

    /// Stable lowercase identifier stored in the index.
    pub fn id(&self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Python => "python",
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::JavaScript => "javascript",
            Language::Go => "go",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::CSharp => "csharp",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Kotlin => "kotlin",
            Language::Swift => "swift",
            Language::Scala => "scala",
            Language::Lua => "lua",
            Language::Shell => "shell",
            Language::Sql => "sql",
            Language::Html => "html",
            Language::Css => "css",
            Language::Markdown => "markdown",
            Language::Json => "json",
            Language::Yaml => "yaml",
            Language::Toml => "toml",
            Language::Xml => "xml",
            Language::Text => "text",
        }
    }

    /// Get the tree-sitter language grammar for this language.
    ///
    /// Returns `None` for languages indexed through line windows only.
    pub fn tree_sitter_language(&self) -> Option<tree_sitter::Language> {
        match self {
            Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
            Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Language::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Language::Go => Some(tree_sitter_go::LANGUAGE.into()),
            Language::Java => Some(tree_sitter_java::LANGUAGE.into()),
            Language::C => Some(tree_sitter_c::LANGUAGE.into()),
            Language::Cpp => Some(tree_sitter_cpp::LANGUAGE.into()),
            _ => None,
        }
    }

    /// Whether a tree-sitter grammar is available.
    pub fn is_ast_capable(&self) -> bool {
        matches!(
            self,
            Language::Rust
                | Language::Python
                | Language::TypeScript
                | Language::Tsx
                | Language::JavaScript
                | Language::Go
                | Language::Java
                | Language::C
                | Language::Cpp
        )
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Outcome of resolving one file.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use codebox_scan::language::{resolve, Language};
///
/// let r = resolve(Path::new("tool"), "#!/usr/bin/env python3\nprint('hi')\n");
/// assert_eq!(r.language, Language::Python);
/// assert!(r.ast_capable);
/// assert!(r.guessed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    /// Resolved language, [`Language::Text`] when nothing matched.
    pub language: Language,
    /// Whether the AST chunking path applies.
    pub ast_capable: bool,
    /// Whether the content guesser decided rather than the extension table.
    pub guessed: bool,
}

impl Resolution {
    fn new(language: Language, guessed: bool) -> Self {
        Self {
            language,
            ast_capable: language.is_ast_capable(),
            guessed,
        }
    }
}

/// Resolve the language of `path` using a sample of its content.
///
/// Never fails: unrecognised files resolve to [`Language::Text`] with
/// `ast_capable = false`.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use codebox_scan::language::{resolve, Language};
///
/// assert_eq!(resolve(Path::new("src/lib.rs"), "").language, Language::Rust);
/// let header = "#include <vector>\nnamespace v { class A {}; }\n";
/// assert_eq!(resolve(Path::new("inc/vec.h"), header).language, Language::Cpp);
/// assert_eq!(resolve(Path::new("notes"), "just some words").language, Language::Text);
/// ```
pub fn resolve(path: &Path, sample: &str) -> Resolution {
    let sample = truncate_sample(sample);
    let ext = path.extension().and_then(|e| e.to_str());

    if let Some(lang) = ext.and_then(Language::from_extension) {
        if ext.is_some_and(|e| e.eq_ignore_ascii_case("h")) {
            if let Some(Language::Cpp) = guess_language(sample) {
                return Resolution::new(Language::Cpp, true);
            }
        }
        if lang != Language::Text {
            return Resolution::new(lang, false);
        }
    }

    if let Some(lang) = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(Language::from_file_name)
    {
        return Resolution::new(lang, false);
    }

    match guess_language(sample) {
        Some(lang) => Resolution::new(lang, true),
        None => Resolution::new(Language::Text, false),
    }
}

fn truncate_sample(sample: &str) -> &str {
    if sample.len() <= SAMPLE_SIZE {
        return sample;
    }
    let mut end = SAMPLE_SIZE;
    while !sample.is_char_boundary(end) {
        end -= 1;
    }
    &sample[..end]
}

/// Guess a language from content alone.
///
/// Checks, in order: shebang, editor modeline, JSON validity, and strong
/// syntactic markers. Returns `None` when nothing is conclusive.
///
/// # Examples
///
/// ```
/// use codebox_scan::language::{guess_language, Language};
///
/// assert_eq!(guess_language("#!/bin/bash\necho hi\n"), Some(Language::Shell));
/// assert_eq!(guess_language("package main\n\nfunc main() {}\n"), Some(Language::Go));
/// assert_eq!(guess_language("{\"a\": [1, 2]}"), Some(Language::Json));
/// assert_eq!(guess_language("hello world"), None);
/// ```
pub fn guess_language(sample: &str) -> Option<Language> {
    let sample = truncate_sample(sample);
    let first = sample.lines().next().unwrap_or("");

    if let Some(rest) = first.strip_prefix("#!") {
        if let Some(lang) = shebang_language(rest) {
            return Some(lang);
        }
    }
    if let Some(lang) = sample.lines().take(5).find_map(modeline_language) {
        return Some(lang);
    }
    if sample.trim_start().starts_with("<?php") {
        return Some(Language::Php);
    }
    let trimmed = sample.trim();
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
    {
        return Some(Language::Json);
    }

    marker_scores(sample)
        .into_iter()
        .filter(|(_, score)| *score >= 2)
        .max_by_key(|(_, score)| *score)
        .map(|(lang, _)| lang)
}

fn shebang_language(line: &str) -> Option<Language> {
    let mut parts = line.split_whitespace();
    let program = parts.next()?;
    let program = program.rsplit('/').next().unwrap_or(program);
    let program = if program == "env" {
        parts.find(|p| !p.starts_with('-'))?
    } else {
        program
    };
    Language::from_name(program)
}

fn modeline_language(line: &str) -> Option<Language> {
    if let Some(start) = line.find("-*-") {
        let inner = &line[start + 3..];
        let inner = inner.split("-*-").next().unwrap_or(inner);
        for field in inner.split(';') {
            let field = field.trim();
            let value = field
                .strip_prefix("mode:")
                .or_else(|| (!field.contains(':')).then_some(field));
            if let Some(lang) = value.and_then(Language::from_name) {
                return Some(lang);
            }
        }
    }
    if line.contains("vim:") || line.contains("vi:") {
        for key in ["filetype=", "ft=", "syntax="] {
            if let Some(pos) = line.find(key) {
                let value: String = line[pos + key.len()..]
                    .chars()
                    .take_while(|c| c.is_ascii_alphanumeric() || *c == '+')
                    .collect();
                if let Some(lang) = Language::from_name(&value) {
                    return Some(lang);
                }
            }
        }
    }
    None
}

/// Score each candidate language by the number of distinct markers it shows.
fn marker_scores(sample: &str) -> Vec<(Language, usize)> {
    let has_line = |prefix: &str| sample.lines().any(|l| l.trim_start().starts_with(prefix));
    let count = |checks: &[bool]| checks.iter().filter(|c| **c).count();

    let includes = has_line("#include");
    vec![
        (
            Language::Cpp,
            count(&[
                includes && (sample.contains("std::") || sample.contains("namespace ")),
                sample.contains("template <") || sample.contains("template<"),
                has_line("namespace "),
                has_line("class ") && sample.contains("public:"),
            ]),
        ),
        (
            Language::C,
            count(&[
                includes,
                sample.contains("int main("),
                sample.contains("printf(") || sample.contains("malloc("),
            ]),
        ),
        (
            Language::Rust,
            count(&[
                sample.contains("fn main(") || has_line("pub fn ") || has_line("fn "),
                has_line("use std::") || has_line("use crate::"),
                has_line("impl ") || sample.contains("let mut "),
            ]),
        ),
        (
            Language::Go,
            count(&[
                has_line("package "),
                has_line("func "),
                has_line("import (") || sample.contains(":= "),
            ]),
        ),
        (
            Language::Python,
            count(&[
                sample
                    .lines()
                    .any(|l| l.trim_start().starts_with("def ") && l.trim_end().ends_with(':')),
                has_line("import ") || has_line("from "),
                sample.contains("self.") || has_line("elif ") || sample.contains("__name__"),
            ]),
        ),
        (
            Language::Java,
            count(&[
                has_line("public class ") || has_line("public final class "),
                has_line("import java.") || sample.contains("System.out."),
                has_line("package ") && sample.contains(';'),
            ]),
        ),
        (
            Language::TypeScript,
            count(&[
                has_line("interface ") || has_line("export interface "),
                sample.contains(": string") || sample.contains(": number"),
                has_line("export type ") || has_line("type "),
            ]),
        ),
        (
            Language::JavaScript,
            count(&[
                has_line("function ") || sample.contains("=> {"),
                sample.contains("require(") || sample.contains("module.exports"),
                has_line("const ") || has_line("let "),
            ]),
        ),
        (
            Language::Shell,
            count(&[
                sample.lines().any(|l| matches!(l.trim(), "fi" | "esac" | "done")),
                sample.contains("$(") || sample.contains("${"),
                has_line("echo "),
            ]),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_table_wins_over_content() {
        let r = resolve(Path::new("main.go"), "def looks_like_python():\n    pass\n");
        assert_eq!(r.language, Language::Go);
        assert!(!r.guessed);
    }

    #[test]
    fn header_files_default_to_c() {
        let r = resolve(Path::new("lib.h"), "int add(int a, int b);\n");
        assert_eq!(r.language, Language::C);
        assert!(r.ast_capable);
    }

    #[test]
    fn header_with_cpp_markers_is_cpp() {
        let src = "#include <vector>\nnamespace geo {\ntemplate <typename T> class Point {};\n}\n";
        let r = resolve(Path::new("point.h"), src);
        assert_eq!(r.language, Language::Cpp);
        assert!(r.guessed);
    }

    #[test]
    fn shebang_through_env() {
        assert_eq!(
            guess_language("#!/usr/bin/env -S node --harmony\nconsole.log(1)\n"),
            Some(Language::JavaScript)
        );
        assert_eq!(
            guess_language("#!/usr/bin/python3.11\nprint(1)\n"),
            Some(Language::Python)
        );
    }

    #[test]
    fn emacs_and_vim_modelines() {
        assert_eq!(
            guess_language("# -*- mode: ruby -*-\nputs 1\n"),
            Some(Language::Ruby)
        );
        assert_eq!(
            guess_language("// vim: set ft=rust:\nfn x() {}\n"),
            Some(Language::Rust)
        );
    }

    #[test]
    fn python_markers_without_extension() {
        let src = "import os\n\ndef main():\n    print(os.getcwd())\n\nif __name__ == '__main__':\n    main()\n";
        let r = resolve(Path::new("scripts/run"), src);
        assert_eq!(r.language, Language::Python);
        assert!(r.ast_capable);
    }

    #[test]
    fn unknown_content_falls_back_to_text() {
        let r = resolve(Path::new("LICENSE"), "Permission is hereby granted, free of charge");
        assert_eq!(r.language, Language::Text);
        assert!(!r.ast_capable);
        assert!(!r.guessed);
    }

    #[test]
    fn non_ast_languages_are_flagged() {
        let r = resolve(Path::new("README.md"), "# Title\n");
        assert_eq!(r.language, Language::Markdown);
        assert!(!r.ast_capable);
    }

    #[test]
    fn every_ast_language_has_a_grammar() {
        for lang in [
            Language::Rust,
            Language::Python,
            Language::TypeScript,
            Language::Tsx,
            Language::JavaScript,
            Language::Go,
            Language::Java,
            Language::C,
            Language::Cpp,
        ] {
            assert!(lang.is_ast_capable());
            assert!(lang.tree_sitter_language().is_some(), "{lang} has no grammar");
        }
        assert!(Language::Ruby.tree_sitter_language().is_none());
    }

    #[test]
    fn long_samples_are_cut_on_char_boundary() {
        let text = "é".repeat(SAMPLE_SIZE);
        let cut = truncate_sample(&text);
        assert!(cut.len() <= SAMPLE_SIZE);
        assert!(cut.chars().all(|c| c == 'é'));
    }
}

use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use codebox_core::{CodeboxError, IndexConfig};
use sha2::{Digest, Sha256};

use crate::language::{resolve, Language, Resolution};

/// Number of bytes to check for binary detection.
const BINARY_CHECK_SIZE: usize = 8192;

/// A source file read from disk.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use codebox_scan::language::Language;
/// use codebox_scan::walker::SourceFile;
///
/// let file = SourceFile::from_text("src/main.rs", Language::Rust, "fn main() {}");
/// assert_eq!(file.language, Language::Rust);
/// assert_eq!(file.size, 12);
/// assert_eq!(file.content_hash.len(), 64);
/// ```
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the project root.
    pub path: PathBuf,
    /// Resolved language.
    pub language: Language,
    /// Whether the AST chunking path applies.
    pub ast_capable: bool,
    /// Size in bytes.
    pub size: u64,
    /// Last modification, seconds since the Unix epoch (0 if unknown).
    pub modified: u64,
    /// SHA-256 of the content, hex-encoded.
    pub content_hash: String,
    /// Full file content.
    pub content: String,
}

impl SourceFile {
    /// Build a source file from in-memory text.
    pub fn from_text(path: impl Into<PathBuf>, language: Language, content: &str) -> Self {
        Self {
            path: path.into(),
            language,
            ast_capable: language.is_ast_capable(),
            size: content.len() as u64,
            modified: 0,
            content_hash: content_hash(content),
            content: content.to_string(),
        }
    }
}

/// Hex SHA-256 of `text`.
///
/// # Examples
///
/// ```
/// use codebox_scan::walker::content_hash;
///
/// assert_eq!(content_hash("a"), content_hash("a"));
/// assert_ne!(content_hash("a"), content_hash("b"));
/// ```
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Filters applied while enumerating and reading files.
///
/// # Examples
///
/// ```
/// use codebox_core::IndexConfig;
/// use codebox_scan::walker::WalkOptions;
///
/// let opts = WalkOptions::from_config(&IndexConfig::default())
///     .with_languages(Some(vec!["python".into()]));
/// assert!(opts.is_ignored(std::path::Path::new("node_modules/x.js")));
/// ```
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Files larger than this are skipped.
    pub max_file_size: u64,
    /// Name globs matched against every path component.
    pub ignore_patterns: Vec<glob::Pattern>,
    /// Language ids to keep; `None` keeps all.
    pub languages: Option<Vec<String>>,
    /// Whether files that resolve to plain text are indexed.
    pub include_text: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self::from_config(&IndexConfig::default())
    }
}

impl WalkOptions {
    /// Build options from the `[index]` config section.
    ///
    /// Invalid glob patterns are dropped with a warning.
    pub fn from_config(config: &IndexConfig) -> Self {
        let ignore_patterns = config
            .ignore_patterns
            .iter()
            .filter_map(|p| match glob::Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "ignoring invalid ignore pattern");
                    None
                }
            })
            .collect();
        Self {
            max_file_size: config.max_file_size,
            ignore_patterns,
            languages: None,
            include_text: config.include_text,
        }
    }

    /// Restrict enumeration to the given language ids.
    pub fn with_languages(mut self, languages: Option<Vec<String>>) -> Self {
        self.languages = languages.map(|ls| ls.into_iter().map(|l| l.to_lowercase()).collect());
        self
    }

    /// Whether any component of `relative` matches an ignore pattern.
    pub fn is_ignored(&self, relative: &Path) -> bool {
        relative.components().any(|c| match c {
            Component::Normal(name) => {
                let name = name.to_string_lossy();
                self.ignore_patterns.iter().any(|p| p.matches(&name))
            }
            _ => false,
        })
    }

    fn keeps(&self, resolution: &Resolution) -> bool {
        if resolution.language == Language::Text && !self.include_text {
            return false;
        }
        match &self.languages {
            Some(allowed) => allowed.iter().any(|l| l == resolution.language.id()),
            None => true,
        }
    }
}

/// Enumerate candidate files under `root`, respecting `.gitignore` and the
/// ignore patterns. Returned paths are relative to `root` and sorted.
///
/// # Errors
///
/// Returns [`CodeboxError::FileNotFound`] if `root` is not a directory.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use codebox_scan::walker::{enumerate_files, WalkOptions};
///
/// let paths = enumerate_files(Path::new("."), &WalkOptions::default()).unwrap();
/// ```
pub fn enumerate_files(root: &Path, opts: &WalkOptions) -> Result<Vec<PathBuf>, CodeboxError> {
    if !root.is_dir() {
        return Err(CodeboxError::FileNotFound(root.to_path_buf()));
    }

    let walker = ignore::WalkBuilder::new(root).build();
    let mut paths = Vec::new();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };

        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }

        let relative = match entry.path().strip_prefix(root) {
            Ok(r) => r.to_path_buf(),
            Err(_) => continue,
        };
        if opts.is_ignored(&relative) {
            continue;
        }
        paths.push(relative);
    }

    paths.sort();
    Ok(paths)
}

/// Read and resolve one file.
///
/// Returns `Ok(None)` for files that are skipped by policy: binary content,
/// too large, invalid UTF-8, or filtered out by language.
///
/// # Errors
///
/// Returns [`CodeboxError::Io`] if the file exists but cannot be read.
pub fn read_source_file(
    root: &Path,
    relative: &Path,
    opts: &WalkOptions,
) -> Result<Option<SourceFile>, CodeboxError> {
    let path = root.join(relative);
    let metadata = std::fs::metadata(&path)?;
    if !metadata.is_file() {
        return Ok(None);
    }
    if metadata.len() > opts.max_file_size {
        tracing::debug!(path = %relative.display(), size = metadata.len(), "skipping oversized file");
        return Ok(None);
    }

    let bytes = std::fs::read(&path)?;
    let check_len = bytes.len().min(BINARY_CHECK_SIZE);
    if bytes[..check_len].contains(&0) {
        tracing::debug!(path = %relative.display(), "skipping binary file");
        return Ok(None);
    }
    let content = match String::from_utf8(bytes) {
        Ok(content) => content,
        Err(e) => {
            tracing::debug!(
                path = %relative.display(),
                valid_up_to = e.utf8_error().valid_up_to(),
                "skipping file that is not valid UTF-8"
            );
            return Ok(None);
        }
    };

    let resolution = resolve(relative, &content);
    if !opts.keeps(&resolution) {
        return Ok(None);
    }

    let modified = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);

    Ok(Some(SourceFile {
        path: relative.to_path_buf(),
        language: resolution.language,
        ast_capable: resolution.ast_capable,
        size: metadata.len(),
        modified,
        content_hash: content_hash(&content),
        content,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn read_all(root: &Path, opts: &WalkOptions) -> Vec<SourceFile> {
        enumerate_files(root, opts)
            .unwrap()
            .into_iter()
            .filter_map(|rel| read_source_file(root, &rel, opts).unwrap())
            .collect()
    }

    fn make_temp_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("src/lib.py"), "def hello(): pass").unwrap();
        fs::write(root.join("src/app.ts"), "function run() {}").unwrap();
        fs::write(root.join("src/util.js"), "const x = 1;").unwrap();
        fs::write(root.join("src/main.go"), "package main").unwrap();
        fs::write(root.join("README.md"), "# Hello").unwrap();
        fs::write(root.join("data.csv"), "a,b,c").unwrap();

        dir
    }

    #[test]
    fn walk_finds_known_language_files() {
        let dir = make_temp_repo();
        let files = read_all(dir.path(), &WalkOptions::default());

        let languages: Vec<Language> = files.iter().map(|f| f.language).collect();
        assert_eq!(files.len(), 6, "unexpected files: {languages:?}");
        assert!(languages.contains(&Language::Rust));
        assert!(languages.contains(&Language::Python));
        assert!(languages.contains(&Language::Markdown));
        assert!(!languages.contains(&Language::Text));
    }

    #[test]
    fn walk_respects_gitignore() {
        let dir = make_temp_repo();
        let root = dir.path();

        // The ignore crate needs a .git dir to recognize .gitignore files
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("generated")).unwrap();
        fs::write(root.join("generated/output.rs"), "fn ignored() {}").unwrap();
        fs::write(root.join(".gitignore"), "generated/\n").unwrap();

        let files = read_all(root, &WalkOptions::default());
        for f in &files {
            assert!(
                !f.path.starts_with("generated"),
                "gitignored file should be skipped: {}",
                f.path.display()
            );
        }
    }

    #[test]
    fn ignore_patterns_apply_to_any_component() {
        let dir = make_temp_repo();
        let root = dir.path();
        fs::create_dir_all(root.join("web/node_modules/pkg")).unwrap();
        fs::write(root.join("web/node_modules/pkg/index.js"), "module.exports = 1;").unwrap();
        fs::write(root.join("web/app.min.js"), "var a=1;").unwrap();
        fs::create_dir_all(root.join(".codebox")).unwrap();
        fs::write(root.join(".codebox/CURRENT"), "1").unwrap();

        let paths = enumerate_files(root, &WalkOptions::default()).unwrap();
        assert!(paths.iter().all(|p| !p.starts_with("web/node_modules")));
        assert!(!paths.contains(&PathBuf::from("web/app.min.js")));
        assert!(paths.iter().all(|p| !p.starts_with(".codebox")));
    }

    #[test]
    fn walk_skips_binary_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let mut binary_content = b"fn main() { ".to_vec();
        binary_content.push(0);
        binary_content.extend_from_slice(b" }");
        fs::write(root.join("binary.rs"), &binary_content).unwrap();
        fs::write(root.join("normal.rs"), "fn normal() {}").unwrap();

        let files = read_all(root, &WalkOptions::default());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, PathBuf::from("normal.rs"));
    }

    #[test]
    fn walk_skips_large_and_plain_text_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        fs::write(root.join("huge.rs"), "x".repeat(1_048_577)).unwrap();
        fs::write(root.join("data.txt"), "hello").unwrap();
        fs::write(root.join("ok.rs"), "fn ok() {}").unwrap();

        let files = read_all(root, &WalkOptions::default());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, PathBuf::from("ok.rs"));
    }

    #[test]
    fn plain_text_is_kept_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "remember the milk\n").unwrap();
        fs::write(dir.path().join("ok.rs"), "fn ok() {}").unwrap();

        let config = IndexConfig {
            include_text: true,
            ..IndexConfig::default()
        };
        let files = read_all(dir.path(), &WalkOptions::from_config(&config));
        let text: Vec<_> = files.iter().filter(|f| f.language == Language::Text).collect();
        assert_eq!(text.len(), 1);
        assert_eq!(text[0].path, PathBuf::from("notes.txt"));
        assert!(!text[0].ast_capable);
    }

    #[test]
    fn invalid_utf8_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("latin1.py"), b"name = '\xe9t\xe9'\n").unwrap();
        let skipped =
            read_source_file(dir.path(), Path::new("latin1.py"), &WalkOptions::default()).unwrap();
        assert!(skipped.is_none());
    }

    #[test]
    fn language_filter_keeps_only_requested() {
        let dir = make_temp_repo();
        let opts = WalkOptions::default().with_languages(Some(vec!["Python".into()]));
        let files = read_all(dir.path(), &opts);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].language, Language::Python);
    }

    #[test]
    fn extensionless_script_is_guessed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("deploy"), "#!/usr/bin/env bash\necho deploying\n").unwrap();
        let files = read_all(dir.path(), &WalkOptions::default());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].language, Language::Shell);
        assert!(!files[0].ast_capable);
    }

    #[test]
    fn source_file_records_size_and_hash() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        let file = read_source_file(dir.path(), Path::new("a.py"), &WalkOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(file.size, 6);
        assert_eq!(file.content_hash, content_hash("x = 1\n"));
        assert!(file.modified > 0);
    }

    #[test]
    fn missing_root_is_an_error() {
        let err = enumerate_files(Path::new("/definitely/not/here"), &WalkOptions::default());
        assert!(matches!(err, Err(CodeboxError::FileNotFound(_))));
    }
}

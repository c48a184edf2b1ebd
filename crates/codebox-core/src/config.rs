use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CodeboxError;

/// Top-level configuration loaded from `.codebox.toml`.
///
/// Every section is optional; missing keys take documented defaults.
///
/// # Examples
///
/// ```
/// use codebox_core::CodeboxConfig;
///
/// let config = CodeboxConfig::default();
/// assert_eq!(config.search.rrf_k, 60);
/// assert_eq!(config.output.preview_length, 200);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeboxConfig {
    /// Embedding provider settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// File enumeration and build settings.
    #[serde(default)]
    pub index: IndexConfig,
    /// Chunking profiles and auto-selection thresholds.
    #[serde(default)]
    pub profiles: ProfileConfig,
    /// Retrieval settings.
    #[serde(default)]
    pub search: SearchConfig,
    /// Result shaping settings.
    #[serde(default)]
    pub output: OutputConfig,
    /// Filesystem watcher settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl CodeboxConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Io`] if the file cannot be read, or
    /// [`CodeboxError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use codebox_core::CodeboxConfig;
    /// use std::path::Path;
    ///
    /// let config = CodeboxConfig::from_file(Path::new(".codebox.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, CodeboxError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Toml`] if parsing fails, or
    /// [`CodeboxError::Config`] if a value is out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use codebox_core::CodeboxConfig;
    ///
    /// let toml = r#"
    /// [search]
    /// rrf_k = 30
    /// "#;
    /// let config = CodeboxConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.search.rrf_k, 30);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, CodeboxError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Config`] describing the first violation.
    pub fn validate(&self) -> Result<(), CodeboxError> {
        if self.search.rrf_k == 0 {
            return Err(CodeboxError::Config("search.rrf_k must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.index.failure_threshold) {
            return Err(CodeboxError::Config(
                "index.failure_threshold must be between 0 and 1".into(),
            ));
        }
        for (name, params) in [
            ("medium", &self.profiles.medium),
            ("large", &self.profiles.large),
        ] {
            if params.min_chunk_lines > params.max_chunk_lines {
                return Err(CodeboxError::Config(format!(
                    "profiles.{name}: min_chunk_lines exceeds max_chunk_lines"
                )));
            }
            if params.window_lines == 0 || params.window_overlap >= params.window_lines {
                return Err(CodeboxError::Config(format!(
                    "profiles.{name}: window_overlap must be smaller than a non-zero window_lines"
                )));
            }
        }
        Ok(())
    }

    /// Directory that holds index generations for a project rooted at `root`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::path::Path;
    /// use codebox_core::CodeboxConfig;
    ///
    /// let config = CodeboxConfig::default();
    /// assert_eq!(config.data_dir(Path::new("/repo")), Path::new("/repo/.codebox"));
    /// ```
    pub fn data_dir(&self, root: &Path) -> PathBuf {
        match &self.index.data_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => root.join(dir),
            None => root.join(DEFAULT_DATA_DIR),
        }
    }
}

/// Default name of the per-project data directory.
pub const DEFAULT_DATA_DIR: &str = ".codebox";

/// Configuration for the embedding provider.
///
/// # Examples
///
/// ```
/// use codebox_core::EmbeddingConfig;
///
/// let config = EmbeddingConfig::default();
/// assert_eq!(config.provider, "voyage");
/// assert_eq!(config.model, "voyage-code-3");
/// assert_eq!(config.dimensions, 1024);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: `"voyage"`, `"openai"`, or `"none"` (default: `"voyage"`).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// API key for the embedding provider.
    pub api_key: Option<String>,
    /// Override for the provider's base URL.
    pub base_url: Option<String>,
    /// Model name (default: `"voyage-code-3"`).
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Native (maximum) dimension of the model (default: 1024).
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
    /// Texts per embedding request (default: 64).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Concurrent embedding requests (default: 4).
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_provider() -> String {
    "voyage".into()
}

fn default_embedding_model() -> String {
    "voyage-code-3".into()
}

fn default_embedding_dimensions() -> usize {
    1024
}

fn default_batch_size() -> usize {
    64
}

fn default_max_in_flight() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            base_url: None,
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            batch_size: default_batch_size(),
            max_in_flight: default_max_in_flight(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// File enumeration and build settings.
///
/// # Examples
///
/// ```
/// use codebox_core::IndexConfig;
///
/// let config = IndexConfig::default();
/// assert_eq!(config.max_file_size, 1_048_576);
/// assert!(config.ignore_patterns.iter().any(|p| p == "node_modules"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Where generations are stored; relative paths resolve against the project root.
    pub data_dir: Option<PathBuf>,
    /// Files larger than this many bytes are skipped (default: 1 MiB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// File or directory name globs that are never indexed.
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
    /// Chunking worker threads; 0 uses the available parallelism.
    #[serde(default)]
    pub workers: usize,
    /// Fraction of unreadable files that aborts a build (default: 0.5).
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,
    /// Index files that resolve to no known language as plain-text windows.
    #[serde(default)]
    pub include_text: bool,
}

fn default_max_file_size() -> u64 {
    1_048_576
}

fn default_ignore_patterns() -> Vec<String> {
    [
        "__pycache__",
        "*.pyc",
        ".git",
        "node_modules",
        ".next",
        "dist",
        "build",
        ".vscode",
        ".idea",
        "*.min.js",
        "*.min.css",
        "venv",
        "env",
        ".env",
        "target",
        DEFAULT_DATA_DIR,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_failure_threshold() -> f64 {
    0.5
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            max_file_size: default_max_file_size(),
            ignore_patterns: default_ignore_patterns(),
            workers: 0,
            failure_threshold: default_failure_threshold(),
            include_text: false,
        }
    }
}

/// Chunking and dimension parameters of one profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileParams {
    /// Definitions spanning more lines than this are split into children.
    pub max_chunk_lines: usize,
    /// Statement groups shorter than this are merged into a neighbour.
    pub min_chunk_lines: usize,
    /// Line count of a fallback window.
    pub window_lines: usize,
    /// Lines shared by consecutive fallback windows.
    pub window_overlap: usize,
    /// Embedding dimension; `None` uses the model's native dimension.
    pub dimension: Option<usize>,
}

/// Profile definitions and the thresholds used by `auto`.
///
/// # Examples
///
/// ```
/// use codebox_core::ProfileConfig;
///
/// let config = ProfileConfig::default();
/// assert!(config.large.max_chunk_lines > config.medium.max_chunk_lines);
/// assert_eq!(config.medium.dimension, None);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// `auto` picks `large` at or above this many files (default: 2000).
    #[serde(default = "default_auto_large_files")]
    pub auto_large_files: usize,
    /// `auto` picks `large` at or above this many bytes (default: 64 MiB).
    #[serde(default = "default_auto_large_bytes")]
    pub auto_large_bytes: u64,
    /// Parameters of the `medium` profile.
    #[serde(default = "default_medium")]
    pub medium: ProfileParams,
    /// Parameters of the `large` profile.
    #[serde(default = "default_large")]
    pub large: ProfileParams,
}

fn default_auto_large_files() -> usize {
    2000
}

fn default_auto_large_bytes() -> u64 {
    64 * 1024 * 1024
}

fn default_medium() -> ProfileParams {
    ProfileParams {
        max_chunk_lines: 120,
        min_chunk_lines: 3,
        window_lines: 40,
        window_overlap: 5,
        dimension: None,
    }
}

fn default_large() -> ProfileParams {
    ProfileParams {
        max_chunk_lines: 240,
        min_chunk_lines: 5,
        window_lines: 80,
        window_overlap: 8,
        dimension: Some(256),
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            auto_large_files: default_auto_large_files(),
            auto_large_bytes: default_auto_large_bytes(),
            medium: default_medium(),
            large: default_large(),
        }
    }
}

/// Retrieval settings.
///
/// # Examples
///
/// ```
/// use codebox_core::SearchConfig;
///
/// let config = SearchConfig::default();
/// assert_eq!(config.rrf_k, 60);
/// assert_eq!(config.default_limit, 10);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Rank offset `k` in `1/(k + rank)` (default: 60).
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,
    /// Results returned when no limit is given (default: 10).
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Minimum candidates taken from each list before fusion (default: 200).
    #[serde(default = "default_candidate_window")]
    pub candidate_window: usize,
    /// Query deadline in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_rrf_k() -> u32 {
    60
}

fn default_limit() -> usize {
    10
}

fn default_candidate_window() -> usize {
    200
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            default_limit: default_limit(),
            candidate_window: default_candidate_window(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Result shaping settings.
///
/// # Examples
///
/// ```
/// use codebox_core::OutputConfig;
///
/// let config = OutputConfig::default();
/// assert_eq!(config.max_content_length, 5000);
/// assert!(config.hard_max_content_length > config.max_content_length);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Preview characters in compact and standard modes (default: 200).
    #[serde(default = "default_preview_length")]
    pub preview_length: usize,
    /// Content characters shown in verbose mode (default: 5000).
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
    /// Upper bound even when full content is requested (default: 100000).
    #[serde(default = "default_hard_max_content_length")]
    pub hard_max_content_length: usize,
}

fn default_preview_length() -> usize {
    200
}

fn default_max_content_length() -> usize {
    5000
}

fn default_hard_max_content_length() -> usize {
    100_000
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            preview_length: default_preview_length(),
            max_content_length: default_max_content_length(),
            hard_max_content_length: default_hard_max_content_length(),
        }
    }
}

/// Filesystem watcher settings.
///
/// # Examples
///
/// ```
/// use codebox_core::SyncConfig;
///
/// let config = SyncConfig::default();
/// assert_eq!(config.debounce_ms, 2000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Quiet period after the last event on a file (default: 2000 ms).
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Pending files that trigger a flush before the quiet period ends (default: 10).
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_max_batch() -> usize {
    10
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_batch: default_max_batch(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = CodeboxConfig::default();
        assert_eq!(config.embedding.provider, "voyage");
        assert_eq!(config.embedding.dimensions, 1024);
        assert_eq!(config.embedding.batch_size, 64);
        assert_eq!(config.index.failure_threshold, 0.5);
        assert!(!config.index.include_text);
        assert_eq!(config.profiles.auto_large_files, 2000);
        assert_eq!(config.profiles.large.dimension, Some(256));
        assert_eq!(config.search.rrf_k, 60);
        assert_eq!(config.output.preview_length, 200);
        assert_eq!(config.sync.debounce_ms, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_partial_toml() {
        let toml = r#"
[embedding]
provider = "none"

[profiles.medium]
max_chunk_lines = 60
min_chunk_lines = 2
window_lines = 30
window_overlap = 3

[sync]
debounce_ms = 250
"#;
        let config = CodeboxConfig::from_toml(toml).unwrap();
        assert_eq!(config.embedding.provider, "none");
        assert_eq!(config.embedding.model, "voyage-code-3");
        assert_eq!(config.profiles.medium.max_chunk_lines, 60);
        assert_eq!(config.profiles.medium.dimension, None);
        assert_eq!(config.profiles.large.max_chunk_lines, 240);
        assert_eq!(config.sync.debounce_ms, 250);
        assert_eq!(config.sync.max_batch, 10);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = CodeboxConfig::from_toml("").unwrap();
        assert_eq!(config.search.candidate_window, 200);
        assert_eq!(config.index.max_file_size, 1_048_576);
    }

    #[test]
    fn invalid_toml_returns_error() {
        let result = CodeboxConfig::from_toml("{{invalid}}");
        assert!(result.is_err());
    }

    #[test]
    fn zero_rrf_constant_is_rejected() {
        let err = CodeboxConfig::from_toml("[search]\nrrf_k = 0\n").unwrap_err();
        assert!(err.to_string().contains("rrf_k"), "unexpected: {err}");
    }

    #[test]
    fn overlap_wider_than_window_is_rejected() {
        let toml = r#"
[profiles.large]
max_chunk_lines = 200
min_chunk_lines = 4
window_lines = 10
window_overlap = 10
"#;
        let err = CodeboxConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("profiles.large"), "unexpected: {err}");
    }

    #[test]
    fn relative_data_dir_resolves_against_root() {
        let toml = "[index]\ndata_dir = \"cache/idx\"\n";
        let config = CodeboxConfig::from_toml(toml).unwrap();
        assert_eq!(
            config.data_dir(Path::new("/work/repo")),
            PathBuf::from("/work/repo/cache/idx")
        );
    }
}

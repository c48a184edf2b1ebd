use std::path::PathBuf;

/// Errors that can occur across the codebox workspace.
///
/// Each variant belongs to one component of the pipeline. Library crates use
/// this type directly; the binary renders it through `miette`.
///
/// # Examples
///
/// ```
/// use codebox_core::CodeboxError;
///
/// let err = CodeboxError::Config("missing API key".into());
/// assert!(err.to_string().contains("missing API key"));
/// assert_eq!(err.component(), "config");
/// assert!(!err.is_retryable());
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum CodeboxError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    #[diagnostic(code(codebox::io))]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    #[diagnostic(code(codebox::config), help("check .codebox.toml"))]
    Config(String),

    /// Source code parsing failure.
    #[error("parse error: {0}")]
    #[diagnostic(code(codebox::parse))]
    Parse(String),

    /// Storage engine failure (SQLite, FTS5).
    #[error("index store error: {0}")]
    #[diagnostic(code(codebox::store))]
    Database(String),

    /// Embedding provider or response error.
    #[error("embedding error: {0}")]
    #[diagnostic(code(codebox::embedding))]
    Embedding(String),

    /// Another build already holds the project's build lock.
    #[error("a build is already in progress for {}", .0.display())]
    #[diagnostic(code(codebox::build::busy), help("wait for the running build to finish"))]
    BuildInProgress(PathBuf),

    /// Too many files failed during a build; the previous generation stays current.
    #[error("build aborted: {failed} of {total} files failed")]
    #[diagnostic(code(codebox::build::threshold))]
    FailureThreshold {
        /// Files that could not be processed.
        failed: usize,
        /// Files enumerated for the build.
        total: usize,
    },

    /// The operation was cancelled by its caller.
    #[error("{0} cancelled")]
    #[diagnostic(code(codebox::cancelled))]
    Cancelled(&'static str),

    /// The operation exceeded its deadline.
    #[error("{0} timed out")]
    #[diagnostic(code(codebox::timeout))]
    Timeout(&'static str),

    /// The project has never been indexed.
    #[error("no index found for {}", .0.display())]
    #[diagnostic(code(codebox::no_index), help("run `codebox index` first"))]
    NoIndex(PathBuf),

    /// The backend required by a search mode cannot serve the request.
    #[error("{mode} search unavailable: {reason}")]
    #[diagnostic(code(codebox::search::unavailable), help("keyword mode does not need embeddings"))]
    BackendUnavailable {
        /// Search mode that was requested.
        mode: String,
        /// Why the backend cannot be used.
        reason: String,
    },

    /// The query cannot be executed as written.
    #[error("invalid query: {0}")]
    #[diagnostic(code(codebox::search::query))]
    InvalidQuery(String),

    /// A profile override asks for more dimensions than the index stores.
    #[error("index stores {index}-dimensional vectors but {requested} were requested")]
    #[diagnostic(code(codebox::search::dimension), help("re-index with the requested profile"))]
    DimensionMismatch {
        /// Dimension of the current generation.
        index: usize,
        /// Dimension requested by the query profile.
        requested: usize,
    },

    /// Filesystem watch failure.
    #[error("watch error: {0}")]
    #[diagnostic(code(codebox::watch))]
    Watch(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    #[diagnostic(code(codebox::serialization))]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    #[diagnostic(code(codebox::toml))]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    #[diagnostic(code(codebox::not_found))]
    FileNotFound(PathBuf),
}

impl CodeboxError {
    /// Name of the component that produced this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use codebox_core::CodeboxError;
    ///
    /// let err = CodeboxError::Embedding("503".into());
    /// assert_eq!(err.component(), "embedding adapter");
    /// ```
    pub fn component(&self) -> &'static str {
        match self {
            CodeboxError::Io(_) | CodeboxError::FileNotFound(_) => "filesystem",
            CodeboxError::Config(_) | CodeboxError::Toml(_) => "config",
            CodeboxError::Parse(_) => "chunker",
            CodeboxError::Database(_) | CodeboxError::Serialization(_) => "index store",
            CodeboxError::Embedding(_) => "embedding adapter",
            CodeboxError::BuildInProgress(_) | CodeboxError::FailureThreshold { .. } => {
                "index builder"
            }
            CodeboxError::Cancelled(what) | CodeboxError::Timeout(what) => what,
            CodeboxError::NoIndex(_)
            | CodeboxError::BackendUnavailable { .. }
            | CodeboxError::InvalidQuery(_)
            | CodeboxError::DimensionMismatch { .. } => "hybrid retriever",
            CodeboxError::Watch(_) => "sync watcher",
        }
    }

    /// Whether repeating the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CodeboxError::Io(_)
                | CodeboxError::Database(_)
                | CodeboxError::Embedding(_)
                | CodeboxError::BuildInProgress(_)
                | CodeboxError::Timeout(_)
                | CodeboxError::BackendUnavailable { .. }
                | CodeboxError::Watch(_)
        )
    }

    /// One-line report naming the component and retryability.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::path::PathBuf;
    /// use codebox_core::CodeboxError;
    ///
    /// let err = CodeboxError::BuildInProgress(PathBuf::from("/repo"));
    /// let line = err.report();
    /// assert!(line.starts_with("[index builder]"));
    /// assert!(line.ends_with("(retryable)"));
    /// ```
    pub fn report(&self) -> String {
        let tail = if self.is_retryable() {
            "retryable"
        } else {
            "not retryable"
        };
        format!("[{}] {self} ({tail})", self.component())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: CodeboxError = io_err.into();
        assert!(err.to_string().contains("gone"));
        assert_eq!(err.component(), "filesystem");
    }

    #[test]
    fn config_error_displays_message() {
        let err = CodeboxError::Config("bad value".into());
        assert_eq!(err.to_string(), "configuration error: bad value");
    }

    #[test]
    fn file_not_found_shows_path() {
        let err = CodeboxError::FileNotFound(PathBuf::from("/tmp/missing.rs"));
        assert!(err.to_string().contains("/tmp/missing.rs"));
    }

    #[test]
    fn threshold_error_reports_counts() {
        let err = CodeboxError::FailureThreshold {
            failed: 6,
            total: 10,
        };
        assert_eq!(err.to_string(), "build aborted: 6 of 10 files failed");
        assert!(!err.is_retryable());
    }

    #[test]
    fn unavailable_backend_is_attributed_to_retriever() {
        let err = CodeboxError::BackendUnavailable {
            mode: "vector".into(),
            reason: "no embedder configured".into(),
        };
        assert_eq!(err.component(), "hybrid retriever");
        assert!(err.report().contains("vector search unavailable"));
    }

    #[test]
    fn cancellation_names_the_operation() {
        let err = CodeboxError::Cancelled("index builder");
        assert_eq!(err.component(), "index builder");
        assert_eq!(err.to_string(), "index builder cancelled");
    }
}

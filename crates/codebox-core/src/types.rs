use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Rendering format for command results.
///
/// # Examples
///
/// ```
/// use codebox_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
///
/// let fmt: OutputFormat = "md".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Markdown);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable listing.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
    /// Markdown-formatted output.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// How much of each search hit is shown.
///
/// # Examples
///
/// ```
/// use codebox_core::OutputMode;
///
/// assert_eq!(OutputMode::default(), OutputMode::Standard);
/// assert_eq!("verbose".parse::<OutputMode>().unwrap(), OutputMode::Verbose);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Location, name, score and a short preview.
    Compact,
    /// Compact plus signature, return type and docstring summary.
    #[default]
    Standard,
    /// Standard plus full metadata and content.
    Verbose,
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputMode::Compact => write!(f, "compact"),
            OutputMode::Standard => write!(f, "standard"),
            OutputMode::Verbose => write!(f, "verbose"),
        }
    }
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compact" => Ok(OutputMode::Compact),
            "standard" => Ok(OutputMode::Standard),
            "verbose" => Ok(OutputMode::Verbose),
            other => Err(format!("unknown output mode: {other}")),
        }
    }
}

/// Ranking strategy used by a search.
///
/// # Examples
///
/// ```
/// use codebox_core::SearchMode;
///
/// assert_eq!(SearchMode::default(), SearchMode::Hybrid);
/// assert!(SearchMode::Hybrid.needs_vectors());
/// assert!(!SearchMode::Keyword.needs_vectors());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Embedding similarity only.
    Vector,
    /// Lexical relevance only.
    Keyword,
    /// Reciprocal rank fusion of both.
    #[default]
    Hybrid,
}

impl SearchMode {
    /// Whether this mode requires an embedding backend.
    pub fn needs_vectors(self) -> bool {
        !matches!(self, SearchMode::Keyword)
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Vector => write!(f, "vector"),
            SearchMode::Keyword => write!(f, "keyword"),
            SearchMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vector" | "semantic" => Ok(SearchMode::Vector),
            "keyword" | "lexical" => Ok(SearchMode::Keyword),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(format!("unknown search mode: {other}")),
        }
    }
}

/// Named set of chunking and embedding-dimension parameters.
///
/// `Auto` is resolved to `Medium` or `Large` from the size of the project.
///
/// # Examples
///
/// ```
/// use codebox_core::ProfileName;
///
/// assert_eq!("large".parse::<ProfileName>().unwrap(), ProfileName::Large);
/// assert_eq!(ProfileName::default(), ProfileName::Auto);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileName {
    /// Pick from project size.
    #[default]
    Auto,
    /// Small and mid-sized projects: tighter chunks, full dimension.
    Medium,
    /// Large projects: wider chunks, reduced dimension.
    Large,
}

impl fmt::Display for ProfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileName::Auto => write!(f, "auto"),
            ProfileName::Medium => write!(f, "medium"),
            ProfileName::Large => write!(f, "large"),
        }
    }
}

impl FromStr for ProfileName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(ProfileName::Auto),
            "medium" => Ok(ProfileName::Medium),
            "large" => Ok(ProfileName::Large),
            other => Err(format!("unknown profile: {other}")),
        }
    }
}

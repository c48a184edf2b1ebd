//! Structural chunking, generation-swapped indexing, and hybrid search.
//!
//! Source files are split along their syntax tree into function, method,
//! class and module chunks, embedded, and written into an immutable SQLite
//! generation with an FTS5 keyword index. Queries rank chunks by vector
//! similarity, BM25, or both fused with Reciprocal Rank Fusion.
//!
//! The entry point is [`Project`]:
//!
//! ```no_run
//! use codebox_core::{CodeboxConfig, SearchMode};
//! use codebox_index::{BuildOptions, Project, SearchRequest};
//!
//! # async fn run() -> codebox_core::Result<()> {
//! let project = Project::from_config(".".as_ref(), CodeboxConfig::default())?;
//! project.build(BuildOptions::default()).await?;
//! let response = project
//!     .search(SearchRequest::new("retry with backoff").with_mode(SearchMode::Keyword))
//!     .await?;
//! for result in &response.results {
//!     println!("{} {}", result.rank, result.payload.file_path.display());
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod chunk;
pub mod chunker;
pub mod dialect;
pub mod embedding;
pub mod format;
pub mod generation;
pub mod metadata;
pub mod profile;
pub mod project;
pub mod search;
pub mod store;
pub mod sync;

pub use builder::{BuildOptions, BuildReport};
pub use chunk::{Chunk, ChunkKind};
pub use embedding::{Embedder, HttpEmbedder};
pub use format::{render_search, OutputOptions};
pub use project::{Project, ProjectStats};
pub use search::{SearchRequest, SearchResponse, SearchResult};
pub use sync::SyncHandle;

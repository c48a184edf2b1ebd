//! Core types, configuration, and error handling for codebox.
//!
//! This crate provides the shared foundation used by the other codebox crates:
//! - [`CodeboxError`]: unified error type using `thiserror` and `miette`
//! - [`CodeboxConfig`]: configuration loaded from `.codebox.toml`
//! - Shared enums: [`OutputFormat`], [`OutputMode`], [`SearchMode`], [`ProfileName`]

mod config;
mod error;
mod types;

pub use config::{
    CodeboxConfig, EmbeddingConfig, IndexConfig, OutputConfig, ProfileConfig, ProfileParams,
    SearchConfig, SyncConfig, DEFAULT_DATA_DIR,
};
pub use error::CodeboxError;
pub use types::{OutputFormat, OutputMode, ProfileName, SearchMode};

/// A convenience `Result` type for codebox operations.
pub type Result<T> = std::result::Result<T, CodeboxError>;

//! Chunking profiles: resolving `auto` and the embedding dimension.

use codebox_core::{ProfileConfig, ProfileName, ProfileParams};
use serde::{Deserialize, Serialize};

/// A profile with every choice made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedProfile {
    /// `medium` or `large`, never `auto`.
    pub name: ProfileName,
    /// Chunking parameters.
    pub params: ProfileParams,
    /// Embedding dimension, at most the model's native dimension.
    pub dimension: usize,
}

/// Resolve `requested` for a project of `file_count` files totalling
/// `total_bytes`.
///
/// `auto` picks `large` when either threshold in `config` is reached.
/// A profile dimension above `native_dimension` is clamped.
///
/// # Examples
///
/// ```
/// use codebox_core::{ProfileConfig, ProfileName};
/// use codebox_index::profile::resolve_profile;
///
/// let config = ProfileConfig::default();
/// let small = resolve_profile(ProfileName::Auto, 3, 4_000, &config, 1024);
/// assert_eq!(small.name, ProfileName::Medium);
/// assert_eq!(small.dimension, 1024);
///
/// let big = resolve_profile(ProfileName::Auto, 5_000, 4_000, &config, 1024);
/// assert_eq!(big.name, ProfileName::Large);
/// assert_eq!(big.dimension, 256);
/// ```
pub fn resolve_profile(
    requested: ProfileName,
    file_count: usize,
    total_bytes: u64,
    config: &ProfileConfig,
    native_dimension: usize,
) -> ResolvedProfile {
    let name = match requested {
        ProfileName::Auto => {
            if file_count >= config.auto_large_files || total_bytes >= config.auto_large_bytes {
                ProfileName::Large
            } else {
                ProfileName::Medium
            }
        }
        explicit => explicit,
    };
    let params = match name {
        ProfileName::Large => config.large.clone(),
        _ => config.medium.clone(),
    };
    let dimension = params
        .dimension
        .unwrap_or(native_dimension)
        .min(native_dimension);
    ResolvedProfile {
        name,
        params,
        dimension,
    }
}

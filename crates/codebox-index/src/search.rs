//! Hybrid search with Reciprocal Rank Fusion (RRF).
//!
//! Vector and keyword rankings are computed independently over a candidate
//! window, fused with `Σ 1/(k + rank)`, and only then cut to the requested
//! limit. Ties are broken by chunk id, so equal inputs always give equal
//! output.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use codebox_core::{CodeboxConfig, CodeboxError, ProfileName, Result, SearchMode};
use serde::{Deserialize, Serialize};

use crate::embedding::{EmbeddingAdapter, Embedder};
use crate::format::{shape, ChunkPayload, OutputOptions};
use crate::generation::Generation;
use crate::profile::resolve_profile;
use crate::store::{sanitize_fts_query, RankedId};

/// A search to run against the current generation.
///
/// # Examples
///
/// ```
/// use codebox_core::SearchMode;
/// use codebox_index::search::SearchRequest;
///
/// let request = SearchRequest::new("parse config")
///     .with_mode(SearchMode::Keyword)
///     .with_limit(5)
///     .with_language("rust");
/// assert_eq!(request.limit, Some(5));
/// assert_eq!(request.language.as_deref(), Some("rust"));
/// ```
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Natural-language or keyword query.
    pub query: String,
    /// Ranking strategy.
    pub mode: SearchMode,
    /// Maximum results; `None` uses `search.default_limit`.
    pub limit: Option<usize>,
    /// Only rank chunks of this language id.
    pub language: Option<String>,
    /// Rank vectors at this profile's dimension instead of the index's.
    pub profile: Option<ProfileName>,
    /// Output shaping.
    pub output: OutputOptions,
    /// Overrides `search.timeout_secs`.
    pub timeout: Option<Duration>,
}

impl SearchRequest {
    /// Hybrid search with default limit and output.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            mode: SearchMode::default(),
            limit: None,
            language: None,
            profile: None,
            output: OutputOptions::default(),
            timeout: None,
        }
    }

    /// Set the ranking strategy.
    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the result limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Filter by language id.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into().to_lowercase());
        self
    }

    /// Set output shaping.
    pub fn with_output(mut self, output: OutputOptions) -> Self {
        self.output = output;
        self
    }
}

/// One ranked chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Position in the response, from 1.
    pub rank: usize,
    /// Chunk id.
    pub chunk_id: String,
    /// Fused score in hybrid mode, cosine similarity in vector mode, BM25
    /// magnitude in keyword mode.
    pub score: f64,
    /// 1-indexed rank in the vector list, if present there.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_rank: Option<usize>,
    /// 1-indexed rank in the keyword list, if present there.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_rank: Option<usize>,
    /// Cosine similarity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f64>,
    /// BM25 magnitude.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_score: Option<f64>,
    /// The chunk, shaped for the requested output mode.
    #[serde(flatten)]
    pub payload: ChunkPayload,
}

/// Results of one search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub query: String,
    pub mode: SearchMode,
    /// Generation the search ran against.
    pub generation_id: u64,
    /// Vector dimension used for ranking; 0 in keyword mode.
    pub dimension: usize,
    /// Chunks in the candidate set that have no embedding and so never
    /// appear in the vector ranking. They can still be found by keyword.
    pub unembedded_chunks: usize,
    pub results: Vec<SearchResult>,
}

/// A chunk's place in the fused ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    /// Chunk id.
    pub id: String,
    /// Sum of `1/(k + rank)` over the lists containing the chunk.
    pub score: f64,
    /// 1-indexed vector rank.
    pub vector_rank: Option<usize>,
    /// 1-indexed keyword rank.
    pub keyword_rank: Option<usize>,
    /// Score in the vector list.
    pub vector_score: Option<f64>,
    /// Score in the keyword list.
    pub keyword_score: Option<f64>,
}

/// Fuse two rankings with Reciprocal Rank Fusion.
///
/// Ranks are 1-indexed; a chunk missing from a list contributes nothing for
/// it. The result is sorted by descending score, then ascending id, and is
/// not truncated.
///
/// # Examples
///
/// ```
/// use codebox_index::search::reciprocal_rank_fusion;
/// use codebox_index::store::RankedId;
///
/// let hit = |id: &str| RankedId { id: id.into(), score: 1.0 };
/// let fused = reciprocal_rank_fusion(&[hit("a"), hit("b")], &[hit("b")], 60);
/// assert_eq!(fused[0].id, "b");
/// assert!((fused[0].score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-12);
/// assert!((fused[1].score - 1.0 / 61.0).abs() < 1e-12);
/// ```
pub fn reciprocal_rank_fusion(vector: &[RankedId], keyword: &[RankedId], k: u32) -> Vec<FusedHit> {
    let mut hits: HashMap<&str, FusedHit> = HashMap::new();
    let k = f64::from(k);

    for (i, ranked) in vector.iter().enumerate() {
        let rank = i + 1;
        let hit = hits.entry(ranked.id.as_str()).or_insert_with(|| empty_hit(&ranked.id));
        hit.score += 1.0 / (k + rank as f64);
        hit.vector_rank = Some(rank);
        hit.vector_score = Some(ranked.score);
    }
    for (i, ranked) in keyword.iter().enumerate() {
        let rank = i + 1;
        let hit = hits.entry(ranked.id.as_str()).or_insert_with(|| empty_hit(&ranked.id));
        hit.score += 1.0 / (k + rank as f64);
        hit.keyword_rank = Some(rank);
        hit.keyword_score = Some(ranked.score);
    }

    let mut fused: Vec<FusedHit> = hits.into_values().collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    fused
}

fn empty_hit(id: &str) -> FusedHit {
    FusedHit {
        id: id.to_string(),
        score: 0.0,
        vector_rank: None,
        keyword_rank: None,
        vector_score: None,
        keyword_score: None,
    }
}

/// Present a single ranking in the fused shape, keeping its own scores.
fn single_list(ranked: Vec<RankedId>, vector: bool) -> Vec<FusedHit> {
    ranked
        .into_iter()
        .enumerate()
        .map(|(i, r)| {
            let mut hit = empty_hit(&r.id);
            hit.score = r.score;
            if vector {
                hit.vector_rank = Some(i + 1);
                hit.vector_score = Some(r.score);
            } else {
                hit.keyword_rank = Some(i + 1);
                hit.keyword_score = Some(r.score);
            }
            hit
        })
        .collect()
}

/// Everything a search needs from its project.
#[derive(Clone)]
pub(crate) struct SearchContext {
    pub root: PathBuf,
    pub config: Arc<CodeboxConfig>,
    pub embedder: Option<Arc<dyn Embedder>>,
}

/// Run `request` against `generation`.
pub(crate) async fn run_search(
    ctx: &SearchContext,
    generation: Arc<Generation>,
    request: SearchRequest,
) -> Result<SearchResponse> {
    let query = request.query.trim().to_string();
    if query.is_empty() {
        return Err(CodeboxError::InvalidQuery("query is empty".into()));
    }
    let limit = request.limit.unwrap_or(ctx.config.search.default_limit);
    if limit == 0 {
        return Err(CodeboxError::InvalidQuery("limit must be at least 1".into()));
    }
    let has_terms = !sanitize_fts_query(&query).is_empty();
    if request.mode == SearchMode::Keyword && !has_terms {
        return Err(CodeboxError::InvalidQuery(format!(
            "'{query}' has no searchable terms"
        )));
    }

    let meta = generation.meta().clone();
    let query_vector = if request.mode.needs_vectors() {
        let unavailable = |reason: String| CodeboxError::BackendUnavailable {
            mode: request.mode.to_string(),
            reason,
        };
        let embedder = ctx
            .embedder
            .as_ref()
            .ok_or_else(|| unavailable("no embedding provider configured".into()))?;
        if meta.dimension == 0 {
            return Err(unavailable("the index was built without embeddings".into()));
        }
        if meta.model.as_deref() != Some(embedder.model_name()) {
            return Err(unavailable(format!(
                "the index was built with model '{}' but '{}' is configured",
                meta.model.as_deref().unwrap_or("none"),
                embedder.model_name()
            )));
        }
        let dimension = match request.profile {
            Some(profile) => {
                let requested = resolve_profile(
                    profile,
                    0,
                    0,
                    &ctx.config.profiles,
                    embedder.native_dimension(),
                )
                .dimension;
                if requested > meta.dimension {
                    return Err(CodeboxError::DimensionMismatch {
                        index: meta.dimension,
                        requested,
                    });
                }
                requested
            }
            None => meta.dimension,
        };
        let adapter = EmbeddingAdapter::new(Arc::clone(embedder), dimension, 1, 1);
        let vector = adapter
            .embed_query(&query)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        Some(vector)
    } else {
        None
    };

    let window = match request.mode {
        SearchMode::Hybrid => (limit * 10).max(ctx.config.search.candidate_window),
        _ => limit,
    };
    let rrf_k = ctx.config.search.rrf_k;
    let root = ctx.root.clone();
    let generation_id = generation.id();
    let dimension = query_vector.as_ref().map(Vec::len).unwrap_or(0);

    tokio::task::spawn_blocking(move || {
        let store = generation.reader()?;
        let language = request.language.as_deref();

        let vector_hits = match &query_vector {
            Some(vector) => store.vector_search(vector, language, window)?,
            None => Vec::new(),
        };
        let keyword_hits = if request.mode != SearchMode::Vector && has_terms {
            store.keyword_search(&query, language, window)?
        } else {
            Vec::new()
        };
        let unembedded_chunks = if request.mode.needs_vectors() {
            store.count_unembedded(language)?
        } else {
            0
        };

        let mut ranked = match request.mode {
            SearchMode::Hybrid => reciprocal_rank_fusion(&vector_hits, &keyword_hits, rrf_k),
            SearchMode::Vector => single_list(vector_hits, true),
            SearchMode::Keyword => single_list(keyword_hits, false),
        };
        ranked.truncate(limit);

        let ids: Vec<String> = ranked.iter().map(|h| h.id.clone()).collect();
        let mut chunks = store.chunks_by_ids(&ids)?;
        let results = ranked
            .into_iter()
            .filter_map(|hit| {
                let chunk = chunks.remove(&hit.id)?;
                Some((hit, chunk))
            })
            .enumerate()
            .map(|(i, (hit, chunk))| SearchResult {
                rank: i + 1,
                payload: shape(&chunk, &request.output, &root),
                chunk_id: hit.id,
                score: hit.score,
                vector_rank: hit.vector_rank,
                keyword_rank: hit.keyword_rank,
                vector_score: hit.vector_score,
                keyword_score: hit.keyword_score,
            })
            .collect();

        Ok(SearchResponse {
            query,
            mode: request.mode,
            generation_id,
            dimension,
            unembedded_chunks,
            results,
        })
    })
    .await
    .map_err(|e| CodeboxError::Io(std::io::Error::other(format!("search task failed: {e}"))))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(ids: &[&str]) -> Vec<RankedId> {
        ids.iter()
            .map(|id| RankedId {
                id: id.to_string(),
                score: 0.5,
            })
            .collect()
    }

    #[test]
    fn fused_score_sums_reciprocal_ranks() {
        let fused = reciprocal_rank_fusion(&ranked(&["a", "b", "c"]), &ranked(&["c", "d"]), 60);
        let score = |id: &str| fused.iter().find(|h| h.id == id).unwrap().score;
        assert!((score("c") - (1.0 / 63.0 + 1.0 / 61.0)).abs() < 1e-12);
        assert!((score("a") - 1.0 / 61.0).abs() < 1e-12);
        assert!((score("d") - 1.0 / 62.0).abs() < 1e-12);
        let c = fused.iter().find(|h| h.id == "c").unwrap();
        assert_eq!((c.vector_rank, c.keyword_rank), (Some(3), Some(1)));
    }

    #[test]
    fn ties_break_by_chunk_id() {
        let fused = reciprocal_rank_fusion(&ranked(&["zeta"]), &ranked(&["alpha"]), 60);
        assert_eq!(fused[0].score, fused[1].score);
        assert_eq!(fused[0].id, "alpha");
        assert_eq!(fused[1].id, "zeta");
    }

    #[test]
    fn union_is_capped_only_after_fusion() {
        // 3 vector hits and 4 keyword hits sharing 2 chunks: 5 distinct.
        let vector = ranked(&["v1", "s1", "s2"]);
        let keyword = ranked(&["k1", "s2", "k2", "s1"]);
        let mut fused = reciprocal_rank_fusion(&vector, &keyword, 60);
        assert_eq!(fused.len(), 5);
        fused.truncate(5);
        let ids: Vec<&str> = fused.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["s2", "s1", "k1", "v1", "k2"]);
        assert!(fused.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn rrf_empty_inputs() {
        assert!(reciprocal_rank_fusion(&[], &[], 60).is_empty());
    }

    #[test]
    fn single_list_keeps_primary_scores() {
        let hits = single_list(
            vec![RankedId {
                id: "a".into(),
                score: 7.5,
            }],
            false,
        );
        assert_eq!(hits[0].score, 7.5);
        assert_eq!(hits[0].keyword_rank, Some(1));
        assert!(hits[0].vector_rank.is_none());
    }
}

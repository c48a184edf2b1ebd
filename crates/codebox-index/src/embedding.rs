//! Embedding providers and the dimension-adapting layer in front of them.
//!
//! Vectors are always requested at the model's native dimension `D`. A
//! profile asking for `d < D` keeps the first `d` coordinates and rescales
//! them to unit length; a request above `D` is clamped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codebox_core::{CodeboxError, EmbeddingConfig, Result};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

/// A text embedding model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed documents for indexing; one vector per text, in order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Length of the vectors the model returns.
    fn native_dimension(&self) -> usize;

    /// Model identifier recorded in the index.
    fn model_name(&self) -> &str;
}

const VOYAGE_BASE_URL: &str = "https://api.voyageai.com/v1";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for `/embeddings` endpoints speaking the Voyage/OpenAI schema.
///
/// # Examples
///
/// ```
/// use codebox_index::embedding::{Embedder, HttpEmbedder};
///
/// let client = HttpEmbedder::new("test-key");
/// assert_eq!(client.model_name(), "voyage-code-3");
/// assert_eq!(client.native_dimension(), 1024);
/// ```
pub struct HttpEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
    send_input_type: bool,
}

impl std::fmt::Debug for HttpEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbedder")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_type: Option<String>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDataItem>,
}

#[derive(Deserialize)]
struct EmbedDataItem {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    /// Voyage client with default model and dimension.
    pub fn new(api_key: &str) -> Self {
        let defaults = EmbeddingConfig::default();
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            base_url: VOYAGE_BASE_URL.to_string(),
            model: defaults.model,
            dimensions: defaults.dimensions,
            send_input_type: true,
        }
    }

    /// Create a client from an [`EmbeddingConfig`].
    ///
    /// Returns `Ok(None)` when the provider is `"none"`. The API key falls
    /// back to `VOYAGE_API_KEY` or `OPENAI_API_KEY` depending on provider.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Config`] for an unknown provider. A missing
    /// API key disables embeddings with a warning.
    ///
    /// # Examples
    ///
    /// ```
    /// use codebox_core::EmbeddingConfig;
    /// use codebox_index::embedding::HttpEmbedder;
    ///
    /// let config = EmbeddingConfig { provider: "none".into(), ..EmbeddingConfig::default() };
    /// assert!(HttpEmbedder::with_config(&config).unwrap().is_none());
    /// ```
    pub fn with_config(config: &EmbeddingConfig) -> Result<Option<Self>> {
        let (default_url, env_key, send_input_type) = match config.provider.as_str() {
            "none" => return Ok(None),
            "voyage" => (VOYAGE_BASE_URL, "VOYAGE_API_KEY", true),
            "openai" => (OPENAI_BASE_URL, "OPENAI_API_KEY", false),
            other => {
                return Err(CodeboxError::Config(format!(
                    "unknown embedding provider '{other}' (expected voyage, openai or none)"
                )))
            }
        };
        let Some(api_key) = config
            .api_key
            .clone()
            .or_else(|| std::env::var(env_key).ok())
        else {
            tracing::warn!(
                provider = %config.provider,
                "embedding API key not found (set embedding.api_key or {env_key}); keyword search only"
            );
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CodeboxError::Embedding(format!("failed to build HTTP client: {e}")))?;

        Ok(Some(Self {
            client,
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| default_url.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            send_input_type,
        }))
    }

    fn build_request(&self, texts: &[String], input_type: &str) -> EmbedRequest {
        EmbedRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
            input_type: self.send_input_type.then(|| input_type.to_string()),
        }
    }

    async fn post(&self, request: &EmbedRequest) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| CodeboxError::Embedding(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".into());
            return Err(CodeboxError::Embedding(format!(
                "embedding API returned {status}: {body}"
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| CodeboxError::Embedding(format!("failed to parse response: {e}")))?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.post(&self.build_request(texts, "document")).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self
            .post(&self.build_request(&[text.to_string()], "query"))
            .await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| CodeboxError::Embedding("empty response from embedding API".into()))
    }

    fn native_dimension(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Embedder construction for `config`, `None` when vectors are disabled.
///
/// # Errors
///
/// Same as [`HttpEmbedder::with_config`].
pub fn embedder_from_config(config: &EmbeddingConfig) -> Result<Option<Arc<dyn Embedder>>> {
    Ok(HttpEmbedder::with_config(config)?.map(|e| Arc::new(e) as Arc<dyn Embedder>))
}

/// Keep the first `dimension` coordinates of `vector` and rescale to unit length.
///
/// # Examples
///
/// ```
/// use codebox_index::embedding::truncate_and_normalize;
///
/// let v = truncate_and_normalize(&[3.0, 4.0, 12.0], 2);
/// assert_eq!(v, vec![0.6, 0.8]);
/// ```
pub fn truncate_and_normalize(vector: &[f32], dimension: usize) -> Vec<f32> {
    let mut out: Vec<f32> = vector.iter().take(dimension).copied().collect();
    let norm = out.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut out {
            *x /= norm;
        }
    }
    out
}

/// Batches chunk texts through an [`Embedder`] and adapts vector length.
#[derive(Clone)]
pub struct EmbeddingAdapter {
    embedder: Arc<dyn Embedder>,
    dimension: usize,
    batch_size: usize,
    max_in_flight: usize,
}

impl std::fmt::Debug for EmbeddingAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingAdapter")
            .field("model", &self.embedder.model_name())
            .field("dimension", &self.dimension)
            .field("batch_size", &self.batch_size)
            .field("max_in_flight", &self.max_in_flight)
            .finish()
    }
}

impl EmbeddingAdapter {
    /// Wrap `embedder`, clamping `dimension` to its native dimension.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        dimension: usize,
        batch_size: usize,
        max_in_flight: usize,
    ) -> Self {
        let dimension = dimension.min(embedder.native_dimension());
        Self {
            embedder,
            dimension,
            batch_size: batch_size.max(1),
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Dimension of the vectors this adapter produces.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Model name of the underlying embedder.
    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    /// Embed `texts`, returning one slot per text.
    ///
    /// A failed batch leaves its slots empty and is logged; it never fails
    /// the whole call.
    pub async fn embed_texts(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let mut slots: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        // Batches are owned: the stream must not borrow `texts` across awaits
        // when a build runs inside a spawned watcher task.
        let batches: Vec<(usize, Vec<String>)> = texts
            .chunks(self.batch_size)
            .enumerate()
            .map(|(i, batch)| (i * self.batch_size, batch.to_vec()))
            .collect();

        let results: Vec<(usize, usize, Result<Vec<Vec<f32>>>)> = stream::iter(batches)
            .map(|(offset, batch)| {
                let embedder = Arc::clone(&self.embedder);
                async move {
                    let result = embedder.embed_documents(&batch).await;
                    (offset, batch.len(), result)
                }
            })
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await;

        for (offset, len, result) in results {
            match result {
                Ok(vectors) if vectors.len() == len => {
                    for (i, vector) in vectors.into_iter().enumerate() {
                        slots[offset + i] = self.adapt(&vector);
                    }
                }
                Ok(vectors) => tracing::warn!(
                    expected = len,
                    received = vectors.len(),
                    "embedding batch returned the wrong number of vectors"
                ),
                Err(e) => tracing::warn!(offset, size = len, error = %e, "embedding batch failed"),
            }
        }
        slots
    }

    /// Embed a query at this adapter's dimension.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Embedding`] if the provider fails or returns a
    /// vector shorter than the adapter's dimension.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let vector = self.embedder.embed_query(query).await?;
        self.adapt(&vector).ok_or_else(|| {
            CodeboxError::Embedding(format!(
                "query vector has {} dimensions, expected at least {}",
                vector.len(),
                self.dimension
            ))
        })
    }

    fn adapt(&self, vector: &[f32]) -> Option<Vec<f32>> {
        if vector.len() < self.dimension {
            return None;
        }
        Some(truncate_and_normalize(vector, self.dimension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        dimension: usize,
    }

    #[async_trait]
    impl Embedder for Fixed {
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.iter().any(|t| t.contains("fail")) {
                return Err(CodeboxError::Embedding("rejected".into()));
            }
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![1.0; self.dimension];
                    v[0] = t.len() as f32;
                    v
                })
                .collect())
        }

        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![2.0; self.dimension])
        }

        fn native_dimension(&self) -> usize {
            self.dimension
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn truncated_unit_vector_has_unit_norm() {
        let raw: Vec<f32> = (1..=16).map(|i| i as f32).collect();
        let full = truncate_and_normalize(&raw, 16);
        assert!((norm(&full) - 1.0).abs() < 1e-5);
        let short = truncate_and_normalize(&full, 5);
        assert_eq!(short.len(), 5);
        assert!((norm(&short) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn zero_vector_stays_zero() {
        assert_eq!(truncate_and_normalize(&[0.0, 0.0, 0.0], 2), vec![0.0, 0.0]);
    }

    #[test]
    fn requested_dimension_is_clamped() {
        let adapter = EmbeddingAdapter::new(Arc::new(Fixed { dimension: 8 }), 64, 4, 2);
        assert_eq!(adapter.dimension(), 8);
    }

    #[tokio::test]
    async fn failed_batch_leaves_only_its_slots_empty() {
        let adapter = EmbeddingAdapter::new(Arc::new(Fixed { dimension: 8 }), 4, 2, 3);
        let texts: Vec<String> = ["a", "b", "fail", "c", "d"].iter().map(|s| s.to_string()).collect();
        let slots = adapter.embed_texts(&texts).await;
        assert_eq!(slots.len(), 5);
        assert!(slots[0].is_some() && slots[1].is_some());
        assert!(slots[2].is_none() && slots[3].is_none(), "second batch failed");
        let last = slots[4].as_ref().unwrap();
        assert_eq!(last.len(), 4);
        assert!((norm(last) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn query_is_truncated_to_adapter_dimension() {
        let adapter = EmbeddingAdapter::new(Arc::new(Fixed { dimension: 8 }), 3, 16, 1);
        let v = adapter.embed_query("anything").await.unwrap();
        assert_eq!(v.len(), 3);
    }

    #[test]
    fn request_format_is_correct() {
        let client = HttpEmbedder::new("test-key");
        let texts = vec!["fn main() {}".to_string(), "struct Foo {}".to_string()];
        let json = serde_json::to_value(client.build_request(&texts, "document")).unwrap();
        assert_eq!(json["model"], "voyage-code-3");
        assert_eq!(json["input_type"], "document");
        assert_eq!(json["input"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn openai_requests_omit_input_type() {
        let config = EmbeddingConfig {
            provider: "openai".into(),
            api_key: Some("k".into()),
            model: "text-embedding-3-small".into(),
            dimensions: 1536,
            ..EmbeddingConfig::default()
        };
        let client = HttpEmbedder::with_config(&config).unwrap().unwrap();
        let json = serde_json::to_value(client.build_request(&["q".to_string()], "query")).unwrap();
        assert!(json.get("input_type").is_none());
        assert_eq!(client.native_dimension(), 1536);
    }

    #[test]
    fn response_parsing_works() {
        let json = r#"{"data": [{"embedding": [0.1, 0.2]}, {"embedding": [0.3, 0.4]}]}"#;
        let response: EmbedResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.data.len(), 2);
        assert_eq!(response.data[1].embedding, vec![0.3, 0.4]);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = EmbeddingConfig {
            provider: "carrier-pigeon".into(),
            ..EmbeddingConfig::default()
        };
        let err = HttpEmbedder::with_config(&config).unwrap_err();
        assert!(err.to_string().contains("carrier-pigeon"));
    }

    #[test]
    fn missing_api_key_disables_embeddings() {
        std::env::remove_var("VOYAGE_API_KEY");
        let config = EmbeddingConfig {
            api_key: None,
            ..EmbeddingConfig::default()
        };
        assert!(HttpEmbedder::with_config(&config).unwrap().is_none());
    }
}

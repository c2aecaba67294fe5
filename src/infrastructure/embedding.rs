use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::domain::embedding::{check_batch, EmbeddingProvider};
use crate::error::EmbeddingError;

/// Local sentence-transformer embeddings (all-MiniLM-L6-v2) computed with fastembed.
/// Used together with the Hugging Face chat provider.
pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
    dimension: usize,
}

impl FastEmbedProvider {
    pub const PROVIDER_ID: &'static str = "huggingface";
    pub const DIMENSION: usize = 384;
    const MAX_BATCH: usize = 256;

    /// Loads the model, downloading it into `cache_dir` on first use.
    pub fn new(cache_dir: Option<PathBuf>) -> Result<Self, EmbeddingError> {
        let mut opts = InitOptions::new(EmbeddingModel::AllMiniLML6V2);
        if let Some(dir) = cache_dir {
            opts = opts.with_cache_dir(dir);
        }
        let model = TextEmbedding::try_new(opts).map_err(|e| EmbeddingError::Unavailable {
            provider: Self::PROVIDER_ID.to_string(),
            message: format!("failed to initialize all-MiniLM-L6-v2: {}", e),
        })?;
        Ok(Self {
            model: Arc::new(model),
            dimension: Self::DIMENSION,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        check_batch(texts, Self::MAX_BATCH)?;
        let model = Arc::clone(&self.model);
        let owned = texts.to_vec();
        let expected = owned.len();
        // Inference is CPU bound; keep it off the async workers.
        let vectors = tokio::task::spawn_blocking(move || model.embed(owned, None))
            .await
            .map_err(|e| EmbeddingError::Unavailable {
                provider: Self::PROVIDER_ID.to_string(),
                message: format!("embedding task failed: {}", e),
            })?
            .map_err(|e| EmbeddingError::Unavailable {
                provider: Self::PROVIDER_ID.to_string(),
                message: e.to_string(),
            })?;
        ensure_shape(Self::PROVIDER_ID, vectors, expected, self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provider_id(&self) -> &str {
        Self::PROVIDER_ID
    }

    fn max_batch_size(&self) -> usize {
        Self::MAX_BATCH
    }
}

/// Embeddings from the OpenAI `/embeddings` endpoint (or any compatible server).
pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    dimension: usize,
}

impl OpenAiEmbeddingProvider {
    pub const PROVIDER_ID: &'static str = "openai";
    pub const DEFAULT_DIMENSION: usize = 1536;
    const MAX_BATCH: usize = 2048;

    pub fn new(client: reqwest::Client, api_key: impl Into<String>, model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            dimension: Self::DEFAULT_DIMENSION,
        }
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    fn unavailable(message: String) -> EmbeddingError {
        EmbeddingError::Unavailable {
            provider: Self::PROVIDER_ID.to_string(),
            message,
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
pub(crate) struct ApiErrorResponse {
    pub(crate) error: ApiErrorDetail,
}

#[derive(Deserialize)]
pub(crate) struct ApiErrorDetail {
    pub(crate) message: String,
}

/// Pulls the `error.message` out of an OpenAI-style error body, falling back to the raw body.
pub(crate) fn api_error_detail(body: String) -> String {
    serde_json::from_str::<ApiErrorResponse>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body)
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        check_batch(texts, Self::MAX_BATCH)?;
        debug!("Embedding {} texts with OpenAI model {}", texts.len(), self.model);

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| Self::unavailable(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("OpenAI embeddings returned {}", status);
            return Err(Self::unavailable(format!("API returned {}: {}", status, api_error_detail(body))));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| EmbeddingError::InvalidResponse {
            provider: Self::PROVIDER_ID.to_string(),
            message: format!("failed to parse response: {}", e),
        })?;

        let mut data = parsed.data;
        // The API documents `index`; order by it when present.
        if data.iter().all(|d| d.index.is_some()) {
            data.sort_by_key(|d| d.index);
        }
        let vectors = data.into_iter().map(|d| d.embedding).collect();
        ensure_shape(Self::PROVIDER_ID, vectors, texts.len(), self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provider_id(&self) -> &str {
        Self::PROVIDER_ID
    }

    fn max_batch_size(&self) -> usize {
        Self::MAX_BATCH
    }
}

/// Deterministic bag-of-words feature hashing. Needs no network or model
/// download, so the whole pipeline can run offline and reproducibly.
pub struct HashingEmbeddingProvider {
    dimension: usize,
}

impl HashingEmbeddingProvider {
    pub const PROVIDER_ID: &'static str = "hashing";
    const MAX_BATCH: usize = 4096;

    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let bucket = (fnv1a(token.as_bytes()) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        check_batch(texts, Self::MAX_BATCH)?;
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provider_id(&self) -> &str {
        Self::PROVIDER_ID
    }

    fn max_batch_size(&self) -> usize {
        Self::MAX_BATCH
    }
}

/// Rejects responses with a missing item or a vector of the wrong length.
fn ensure_shape(provider: &str, vectors: Vec<Vec<f32>>, expected: usize, dimension: usize) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if vectors.len() != expected {
        return Err(EmbeddingError::InvalidResponse {
            provider: provider.to_string(),
            message: format!("expected {} vectors, got {}", expected, vectors.len()),
        });
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(EmbeddingError::InvalidResponse {
            provider: provider.to_string(),
            message: format!("expected dimension {}, got {}", dimension, bad.len()),
        });
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_hashing_provider_is_deterministic_and_normalized() {
        let provider = HashingEmbeddingProvider::new(64);
        let a = provider.embed(&texts(&["Advance request for rent"])).await.unwrap();
        let b = provider.embed(&texts(&["advance REQUEST for rent"])).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hashing_provider_handles_text_without_tokens() {
        let provider = HashingEmbeddingProvider::new(16);
        let v = provider.embed(&texts(&["   ---   "])).await.unwrap();
        assert!(v[0].iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_empty_input_is_an_error() {
        let provider = HashingEmbeddingProvider::new(16);
        assert_matches!(provider.embed(&[]).await, Err(EmbeddingError::EmptyInput));
    }

    #[tokio::test]
    async fn test_openai_provider_orders_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0, 0.0]},
                    {"index": 0, "embedding": [1.0, 0.0, 0.0]}
                ]
            })))
            .mount(&server)
            .await;

        let provider = OpenAiEmbeddingProvider::new(reqwest::Client::new(), "sk-test", "text-embedding-3-small", server.uri())
            .with_dimension(3);
        let vectors = provider.embed(&texts(&["first", "second"])).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
    }

    #[tokio::test]
    async fn test_openai_provider_surfaces_api_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Incorrect API key provided"}
            })))
            .mount(&server)
            .await;

        let provider = OpenAiEmbeddingProvider::new(reqwest::Client::new(), "bad", "text-embedding-3-small", server.uri());
        let err = provider.embed(&texts(&["hello"])).await.unwrap_err();
        assert_matches!(&err, EmbeddingError::Unavailable { provider, .. } if provider == "openai");
        assert!(err.to_string().contains("Incorrect API key provided"));
    }

    #[tokio::test]
    async fn test_openai_provider_rejects_partial_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [1.0, 0.0]}]
            })))
            .mount(&server)
            .await;

        let provider = OpenAiEmbeddingProvider::new(reqwest::Client::new(), "sk", "m", server.uri()).with_dimension(2);
        assert_matches!(
            provider.embed(&texts(&["a", "b"])).await,
            Err(EmbeddingError::InvalidResponse { .. })
        );
    }

    // Downloads model data on first run.
    #[tokio::test]
    #[ignore = "downloads the all-MiniLM-L6-v2 model"]
    async fn test_fastembed_provider_dimension() {
        let provider = FastEmbedProvider::new(None).unwrap();
        let vectors = provider.embed(&texts(&["This is a test document.", "Another document."])).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), FastEmbedProvider::DIMENSION);
    }
}

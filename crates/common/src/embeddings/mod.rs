//! Embedding service abstraction
//!
//! Provides a unified interface for embedding providers:
//! - Local feature hashing (default, deterministic, no network)
//! - Local sentence-transformer model (`fastembed` feature)
//! - OpenAI-compatible `/embeddings` endpoints

mod hashing;
#[cfg(feature = "fastembed")]
mod semantic;

pub use hashing::HashingEmbedder;
#[cfg(feature = "fastembed")]
pub use semantic::{FastEmbedEmbedder, FASTEMBED_DEFAULT_MODEL};

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::retry::{backoff_delay, AttemptFailure};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Identifies the vector space. Indexes built under one version cannot be
    /// queried with another.
    fn model_version(&self) -> String {
        format!("{}@{}", self.model_name(), self.dimension())
    }
}

const BACKOFF_BASE_MS: u64 = 100;
const BACKOFF_MAX_MS: u64 = 2_000;

/// OpenAI embedding client
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
}

#[derive(Serialize)]
struct OpenAIRequest {
    input: Vec<String>,
    model: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    /// Create a new OpenAI embedder
    pub fn new(api_key: String, config: &EmbeddingConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            timeout,
            max_retries: config.max_retries,
        })
    }

    /// Embed one request, retrying transient failures up to `max_retries` times
    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let max_attempts = self.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let start = Instant::now();
            match self.make_request(texts).await {
                Ok(embeddings) => {
                    metrics::record_embedding(start.elapsed().as_secs_f64(), &self.model, texts.len(), true);
                    return Ok(embeddings);
                }
                Err(failure) => {
                    metrics::record_embedding(start.elapsed().as_secs_f64(), &self.model, texts.len(), false);
                    if !failure.is_retryable() || attempt >= max_attempts {
                        tracing::error!(attempt, error = %failure, "Embedding request failed");
                        return Err(AppError::Embedding {
                            message: format!("{} (after {} attempt(s))", failure, attempt),
                        });
                    }

                    let delay = backoff_delay(attempt, BACKOFF_BASE_MS, BACKOFF_MAX_MS);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "Embedding request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn make_request(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, AttemptFailure> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));

        let request = OpenAIRequest {
            input: texts.to_vec(),
            model: self.model.clone(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AttemptFailure::from_reqwest(e, self.timeout))?;

        if !response.status().is_success() {
            return Err(AttemptFailure::from_response(response).await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| AttemptFailure::from_reqwest(e, self.timeout))?;
        let result: OpenAIResponse =
            serde_json::from_str(&body).map_err(|e| AttemptFailure::Malformed(e.to_string()))?;

        if result.data.len() != texts.len() {
            return Err(AttemptFailure::Malformed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                result.data.len()
            )));
        }
        if let Some(bad) = result.data.iter().find(|e| e.embedding.len() != self.dimension) {
            return Err(AttemptFailure::Malformed(format!(
                "model returned {} dimensions, configured for {}",
                bad.embedding.len(),
                self.dimension
            )));
        }

        Ok(result.data.into_iter().map(|e| e.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.request_with_retry(&[text.to_string()]).await?;
        embeddings.into_iter().next().ok_or_else(|| AppError::Embedding {
            message: "Empty response".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // OpenAI has a limit of 2048 texts per request
        const BATCH_SIZE: usize = 100;

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(BATCH_SIZE) {
            let embeddings = self.request_with_retry(chunk).await?;
            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "local" => Ok(Arc::new(HashingEmbedder::new(config.model.clone(), config.dimension)?)),
        #[cfg(feature = "fastembed")]
        "fastembed" => Ok(Arc::new(FastEmbedEmbedder::new(config)?)),
        #[cfg(not(feature = "fastembed"))]
        "fastembed" => Err(AppError::Configuration {
            message: "the fastembed provider needs a build with the `fastembed` feature".to_string(),
        }),
        "openai" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "embedding.api_key is required for the openai provider".to_string(),
            })?;
            Ok(Arc::new(OpenAIEmbedder::new(key, config)?))
        }
        other => Err(AppError::Configuration {
            message: format!("unknown embedding provider `{}`", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn openai_config(base: &str, dimension: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "openai".to_string(),
            api_key: Some("sk-test".to_string()),
            api_base: Some(base.to_string()),
            model: "text-embedding-3-small".to_string(),
            dimension,
            max_retries: 2,
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_create_local_embedder() {
        let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.model_version(), "vedika-hash-v1@384");
    }

    #[test]
    fn test_openai_requires_key() {
        let mut config = openai_config("http://localhost", 3);
        config.api_key = None;
        assert!(matches!(create_embedder(&config), Err(AppError::Configuration { .. })));
    }

    #[test]
    fn test_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "carrier-pigeon".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config).is_err());
    }

    #[tokio::test]
    async fn test_openai_embed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.1, 0.2, 0.3]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = create_embedder(&openai_config(&server.uri(), 3)).unwrap();
        let embedding = embedder.embed("PSLV-C37").await.unwrap();
        assert_eq!(embedding, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_openai_dimension_mismatch_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.1, 0.2]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = create_embedder(&openai_config(&server.uri(), 3)).unwrap();
        assert!(matches!(embedder.embed("x").await, Err(AppError::Embedding { .. })));
    }

    #[tokio::test]
    async fn test_openai_rejected_key_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = create_embedder(&openai_config(&server.uri(), 3)).unwrap();
        match embedder.embed("x").await {
            Err(AppError::Embedding { message }) => assert!(message.contains("401")),
            other => panic!("expected embedding error, got {:?}", other.map(|v| v.len())),
        }
    }

    #[tokio::test]
    async fn test_openai_retries_unavailable_backend() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.1, 0.2, 0.3]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = create_embedder(&openai_config(&server.uri(), 3)).unwrap();
        assert_eq!(embedder.embed("GSLV").await.unwrap(), vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_openai_max_retries_counts_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        // max_retries = 2 means one attempt plus two retries
        let embedder = create_embedder(&openai_config(&server.uri(), 3)).unwrap();
        assert!(embedder.embed("x").await.is_err());
    }

    #[cfg(not(feature = "fastembed"))]
    #[test]
    fn test_fastembed_needs_feature() {
        let config = EmbeddingConfig {
            provider: "fastembed".to_string(),
            ..EmbeddingConfig::default()
        };
        match create_embedder(&config) {
            Err(AppError::Configuration { message }) => assert!(message.contains("fastembed")),
            _ => panic!("expected configuration error"),
        }
    }
}

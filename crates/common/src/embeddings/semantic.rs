//! Local sentence-embedding model (ONNX, via fastembed)
//!
//! The model is downloaded once into the fastembed cache and then runs
//! in-process. Inference is CPU bound and runs on the blocking pool.

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use ::fastembed::{EmbeddingModel, TextEmbedding, TextInitOptions};
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Model used when the configuration does not name a fastembed model
pub const FASTEMBED_DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Names accepted for the default model
const DEFAULT_MODEL_ALIASES: &[&str] = &[
    FASTEMBED_DEFAULT_MODEL,
    "sentence-transformers/all-MiniLM-L6-v2",
    crate::DEFAULT_EMBEDDING_MODEL,
];

pub struct FastEmbedEmbedder {
    model_label: String,
    dimension: usize,
    inner: Arc<Mutex<TextEmbedding>>,
}

impl FastEmbedEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (label, model) = resolve_model(&config.model)?;

        let info = TextEmbedding::get_model_info(&model).map_err(|e| AppError::Configuration {
            message: format!("unable to read metadata for fastembed model `{}`: {}", label, e),
        })?;
        if info.dim != config.dimension {
            return Err(AppError::Configuration {
                message: format!(
                    "fastembed model `{}` produces {} dimensions, embedding.dimension is {}",
                    label, info.dim, config.dimension
                ),
            });
        }

        let inner = TextEmbedding::try_new(TextInitOptions::new(model)).map_err(|e| AppError::Embedding {
            message: format!("failed to initialise fastembed model `{}`: {}", label, e),
        })?;

        tracing::info!(model = %label, dimension = info.dim, "Loaded local embedding model");

        Ok(Self {
            model_label: label,
            dimension: info.dim,
            inner: Arc::new(Mutex::new(inner)),
        })
    }
}

fn resolve_model(name: &str) -> Result<(String, EmbeddingModel)> {
    let name = name.trim();
    if DEFAULT_MODEL_ALIASES.iter().any(|alias| alias.eq_ignore_ascii_case(name)) {
        return Ok((FASTEMBED_DEFAULT_MODEL.to_string(), EmbeddingModel::AllMiniLML6V2));
    }

    let model = EmbeddingModel::from_str(name).map_err(|e| AppError::Configuration {
        message: format!("unknown fastembed model `{}`: {}", name, e),
    })?;
    Ok((name.to_string(), model))
}

#[async_trait]
impl Embedder for FastEmbedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings.into_iter().next().ok_or_else(|| AppError::Embedding {
            message: "fastembed returned no embedding".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let inner = self.inner.clone();
        let owned = texts.to_vec();
        let result = tokio::task::spawn_blocking(move || {
            let mut model = inner
                .lock()
                .map_err(|_| "embedding model lock poisoned".to_string())?;
            model.embed(owned, None).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| AppError::Embedding {
            message: format!("embedding task failed: {}", e),
        })?;

        let vectors = match result {
            Ok(vectors) => vectors,
            Err(message) => {
                metrics::record_embedding(start.elapsed().as_secs_f64(), &self.model_label, texts.len(), false);
                return Err(AppError::Embedding {
                    message: format!("fastembed inference failed: {}", message),
                });
            }
        };
        metrics::record_embedding(start.elapsed().as_secs_f64(), &self.model_label, texts.len(), true);

        if vectors.len() != texts.len() {
            return Err(AppError::Embedding {
                message: format!("expected {} embeddings, got {}", texts.len(), vectors.len()),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(AppError::Embedding {
                message: format!("model returned {} dimensions, expected {}", bad.len(), self.dimension),
            });
        }

        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        &self.model_label
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::cosine_distance;

    #[test]
    fn test_default_model_aliases() {
        let (label, model) = resolve_model("vedika-hash-v1").unwrap();
        assert_eq!(label, FASTEMBED_DEFAULT_MODEL);
        assert_eq!(model, EmbeddingModel::AllMiniLML6V2);

        let (label, _) = resolve_model("sentence-transformers/all-MiniLM-L6-v2").unwrap();
        assert_eq!(label, FASTEMBED_DEFAULT_MODEL);
    }

    #[test]
    fn test_unknown_model_is_configuration_error() {
        assert!(matches!(
            resolve_model("definitely-not-a-model"),
            Err(AppError::Configuration { .. })
        ));
    }

    #[tokio::test]
    #[ignore = "downloads the ONNX model"]
    async fn test_paraphrases_are_close() {
        let embedder = FastEmbedEmbedder::new(&EmbeddingConfig {
            provider: "fastembed".to_string(),
            ..EmbeddingConfig::default()
        })
        .unwrap();
        assert_eq!(embedder.model_version(), "all-MiniLM-L6-v2@384");

        let query = embedder.embed("lunar lander").await.unwrap();
        let moon = embedder.embed("Moon mission").await.unwrap();
        let rocket = embedder.embed("solid rocket booster casting plant").await.unwrap();

        let related = cosine_distance(&query, &moon);
        assert!(related < 1.0);
        assert!(related < cosine_distance(&query, &rocket));
    }
}

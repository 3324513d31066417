//! Retrieval - nearest-neighbour search over the active corpus
//!
//! Exact cosine search: the corpus is small enough that a full scan
//! beats maintaining an approximate structure.

use crate::embeddings::Embedder;
use crate::errors::{AppError, Result};
use crate::index::{CorpusHandle, DocumentMetadata, VectorIndex};
use crate::metrics;
use crate::records::RecordId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// A retrieved chunk, lower distance is more relevant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub content: String,
    /// Cosine distance in [0, 2]
    pub distance: f32,
    pub record_id: RecordId,
    pub chunk_index: usize,
    pub metadata: DocumentMetadata,
}

/// Trait for retrieval strategies
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Up to `k` documents ordered by non-decreasing distance
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedDocument>>;
}

/// Retriever over the published vector index
pub struct VectorRetriever {
    embedder: Arc<dyn Embedder>,
    corpus: CorpusHandle,
}

impl VectorRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, corpus: CorpusHandle) -> Self {
        Self { embedder, corpus }
    }
}

#[async_trait]
impl Retriever for VectorRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedDocument>> {
        let start = Instant::now();
        // Held for the whole search; a concurrent swap does not affect it
        let corpus = self.corpus.current();
        let index = &corpus.index;

        if index.is_empty() {
            metrics::record_search(start.elapsed().as_secs_f64(), 0);
            return Ok(Vec::new());
        }

        let query_model = self.embedder.model_version();
        if index.model_version() != query_model {
            return Err(AppError::ModelMismatch {
                index_model: index.model_version().to_string(),
                query_model,
            });
        }

        let query_vector = self.embedder.embed(query).await?;
        let results = nearest(index, &query_vector, k)?;

        metrics::record_search(start.elapsed().as_secs_f64(), results.len());
        debug!(
            k,
            results = results.len(),
            best_distance = results.first().map(|r| r.distance),
            "Retrieval complete"
        );

        Ok(results)
    }
}

/// Rank every entry against the query vector.
///
/// Returns `min(k, len)` entries (at least one when the index is not empty);
/// equal distances keep index order.
pub fn nearest(index: &VectorIndex, query: &[f32], k: usize) -> Result<Vec<RetrievedDocument>> {
    if index.is_empty() {
        return Ok(Vec::new());
    }
    if query.len() != index.dimension() {
        return Err(AppError::Retrieval {
            message: format!(
                "query vector has {} dimensions, index has {}",
                query.len(),
                index.dimension()
            ),
        });
    }

    let mut scored: Vec<(usize, f32)> = index
        .entries()
        .iter()
        .enumerate()
        .map(|(i, entry)| (i, cosine_distance(query, &entry.vector)))
        .collect();

    // Stable sort keeps insertion order among ties
    scored.sort_by(|a, b| a.1.total_cmp(&b.1));
    scored.truncate(k.clamp(1, index.len()));

    Ok(scored
        .into_iter()
        .map(|(i, distance)| {
            let entry = &index.entries()[i];
            RetrievedDocument {
                content: entry.content.clone(),
                distance,
                record_id: entry.record_id.clone(),
                chunk_index: entry.chunk_index,
                metadata: entry.metadata.clone(),
            }
        })
        .collect())
}

/// `1 - cos(a, b)`, clamped to [0, 2].
///
/// A zero vector has no direction and sits at distance 1 from everything.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }

    let distance = 1.0 - dot / (norm_a.sqrt() * norm_b.sqrt());
    if distance.is_finite() {
        distance.clamp(0.0, 2.0)
    } else {
        2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::index::test_support::{chandrayaan_corpus, embedder, records};
    use crate::index::{Corpus, IndexBuilder, ChunkingConfig};

    #[test]
    fn test_cosine_distance_bounds() {
        assert!((cosine_distance(&[1.0, 0.0], &[1.0, 0.0])).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_distance(&[f32::NAN, 1.0], &[1.0, 1.0]), 2.0);
    }

    #[tokio::test]
    async fn test_chandrayaan_is_closest() {
        let retriever = VectorRetriever::new(embedder(), chandrayaan_corpus().await);
        let results = retriever.search("Tell me about Chandrayaan missions", 5).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].record_id.as_str(), "spacecrafts:123");
        assert!(results[0].distance < 0.5, "distance was {}", results[0].distance);
    }

    #[tokio::test]
    async fn test_results_are_ordered_and_bounded() {
        let retriever = VectorRetriever::new(embedder(), chandrayaan_corpus().await);

        for k in [1, 2, 3, 10] {
            let results = retriever.search("first Indian mission", k).await.unwrap();
            assert_eq!(results.len(), k.min(3));
            for pair in results.windows(2) {
                assert!(pair[0].distance <= pair[1].distance);
            }
            for doc in &results {
                assert!((0.0..=2.0).contains(&doc.distance));
            }
        }
    }

    #[tokio::test]
    async fn test_empty_corpus_returns_nothing() {
        let store = records(&[("launchers.json", "[]")]);
        let builder = IndexBuilder::new(embedder(), ChunkingConfig::default(), 8, 1).unwrap();
        let index = builder.build(&store).await.unwrap();
        let handle = CorpusHandle::new(Corpus::new(store, index));

        let retriever = VectorRetriever::new(embedder(), handle);
        assert!(retriever.search("PSLV", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let store = records(&[(
            "launchers.json",
            r#"[{"id": "a", "name": "Launcher"}, {"id": "b", "name": "Launcher"}, {"id": "c", "name": "Launcher"}]"#,
        )]);
        let builder = IndexBuilder::new(embedder(), ChunkingConfig::default(), 8, 1).unwrap();
        let index = builder.build(&store).await.unwrap();

        let query = embedder().embed_text("Launcher");
        let ids: Vec<String> = nearest(&index, &query, 3)
            .unwrap()
            .into_iter()
            .map(|d| d.record_id.to_string())
            .collect();
        assert_eq!(ids, vec!["launchers:a", "launchers:b", "launchers:c"]);
    }

    #[tokio::test]
    async fn test_model_mismatch_is_rejected() {
        let other = Arc::new(HashingEmbedder::new("other-model", 384).unwrap());
        let retriever = VectorRetriever::new(other, chandrayaan_corpus().await);

        let err = retriever.search("Chandrayaan", 3).await.unwrap_err();
        assert!(matches!(err, AppError::ModelMismatch { .. }));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_rejected() {
        let corpus = chandrayaan_corpus().await.current();
        let err = nearest(&corpus.index, &[1.0, 0.0], 3).unwrap_err();
        assert!(matches!(err, AppError::Retrieval { .. }));
    }
}

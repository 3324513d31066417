//! Index builder: records -> chunks -> embeddings

use super::{
    Chunker, ChunkingConfig, DistanceMetric, IndexEntry, IndexFingerprint, IndexManifest, VectorIndex,
    INDEX_FORMAT_VERSION,
};
use crate::config::AppConfig;
use crate::embeddings::Embedder;
use crate::errors::{AppError, Result};
use crate::records::RecordStore;
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// A chunk waiting for its vector
struct PendingEntry {
    id: String,
    record_id: crate::records::RecordId,
    chunk_index: usize,
    content: String,
    metadata: super::DocumentMetadata,
}

pub struct IndexBuilder {
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
    batch_size: usize,
    concurrency: usize,
}

impl IndexBuilder {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        chunking: ChunkingConfig,
        batch_size: usize,
        concurrency: usize,
    ) -> Result<Self> {
        Ok(Self {
            embedder,
            chunker: Chunker::new(chunking)?,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
        })
    }

    pub fn from_config(embedder: Arc<dyn Embedder>, config: &AppConfig) -> Result<Self> {
        Self::new(
            embedder,
            ChunkingConfig::from(&config.index),
            config.embedding.batch_size,
            config.index.build_concurrency,
        )
    }

    /// Fingerprint an index built by this builder over the given snapshot would carry
    pub fn fingerprint(&self, corpus_hash: &str) -> IndexFingerprint {
        let chunking = self.chunker.config();
        IndexFingerprint {
            model_version: self.embedder.model_version(),
            dimension: self.embedder.dimension(),
            metric: DistanceMetric::Cosine,
            chunk_size: chunking.chunk_size,
            chunk_overlap: chunking.chunk_overlap,
            min_chunk_chars: chunking.min_chunk_chars,
            corpus_hash: corpus_hash.to_string(),
        }
    }

    /// Build a complete index. Fails on the first record that cannot be indexed;
    /// a partial index is never returned.
    pub async fn build(&self, records: &RecordStore) -> Result<VectorIndex> {
        let start = Instant::now();
        let pending = self.chunk_records(records)?;

        let texts: Vec<String> = pending.iter().map(|p| p.content.clone()).collect();
        let vectors = self.embed_all(&texts).await?;

        let dimension = self.embedder.dimension();
        let mut entries = Vec::with_capacity(pending.len());
        for (entry, vector) in pending.into_iter().zip(vectors) {
            if vector.len() != dimension {
                return Err(AppError::IndexBuild {
                    message: format!(
                        "embedder returned {} dimensions for {}, expected {}",
                        vector.len(),
                        entry.id,
                        dimension
                    ),
                    record_id: Some(entry.record_id.to_string()),
                });
            }
            entries.push(IndexEntry {
                id: entry.id,
                record_id: entry.record_id,
                chunk_index: entry.chunk_index,
                content: entry.content,
                metadata: entry.metadata,
                vector,
            });
        }

        let manifest = IndexManifest {
            format_version: INDEX_FORMAT_VERSION,
            build_id: Uuid::new_v4(),
            built_at: Utc::now(),
            fingerprint: self.fingerprint(records.content_hash()),
            record_count: records.len(),
            entry_count: entries.len(),
        };

        let index = VectorIndex::new(manifest, entries).map_err(|message| AppError::IndexBuild {
            message,
            record_id: None,
        })?;

        info!(
            build_id = %index.manifest().build_id,
            records = records.len(),
            entries = index.len(),
            model_version = %index.model_version(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Index built"
        );

        Ok(index)
    }

    fn chunk_records(&self, records: &RecordStore) -> Result<Vec<PendingEntry>> {
        let mut pending = Vec::new();

        for record in records.iter() {
            let text = record.render_text();
            if text.trim().is_empty() {
                return Err(AppError::IndexBuild {
                    message: format!("record {} has no extractable text", record.id),
                    record_id: Some(record.id.to_string()),
                });
            }

            let metadata = record.metadata();
            metadata.validate().map_err(|message| AppError::IndexBuild {
                message,
                record_id: Some(record.id.to_string()),
            })?;

            let chunks = self.chunker.chunk(&text);
            debug!(record_id = %record.id, chunks = chunks.len(), "Record chunked");

            for chunk in chunks {
                pending.push(PendingEntry {
                    id: format!("{}#{}", record.id, chunk.index),
                    record_id: record.id.clone(),
                    chunk_index: chunk.index,
                    content: chunk.content,
                    metadata: metadata.clone(),
                });
            }
        }

        Ok(pending)
    }

    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let batches: Vec<Vec<Vec<f32>>> = stream::iter(texts.chunks(self.batch_size))
            .map(|batch| async move {
                let vectors = self.embedder.embed_batch(batch).await.map_err(|e| AppError::IndexBuild {
                    message: format!("embedding failed: {}", e),
                    record_id: None,
                })?;
                if vectors.len() != batch.len() {
                    return Err(AppError::IndexBuild {
                        message: format!("embedder returned {} vectors for {} texts", vectors.len(), batch.len()),
                        record_id: None,
                    });
                }
                Ok(vectors)
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        Ok(batches.into_iter().flatten().collect())
    }
}

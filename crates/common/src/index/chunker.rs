//! Record chunking
//!
//! Splits rendered record text into overlapping chunks for embedding.

use crate::config::IndexConfig;
use crate::errors::{AppError, Result};
use text_splitter::{ChunkConfig, TextSplitter};
use tracing::debug;

/// Configuration for text chunking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters
    pub chunk_size: usize,
    /// Overlap between chunks in characters
    pub chunk_overlap: usize,
    /// Chunks below this size are dropped, except a record's only chunk
    pub min_chunk_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from(&IndexConfig::default())
    }
}

impl From<&IndexConfig> for ChunkingConfig {
    fn from(config: &IndexConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            min_chunk_chars: config.min_chunk_chars,
        }
    }
}

/// A text chunk with its position in the source text
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub content: String,
    /// Position among the kept chunks of the record
    pub index: usize,
    /// Byte offset in the rendered text
    pub start_pos: usize,
}

/// Reusable splitter for one chunking configuration
pub struct Chunker {
    config: ChunkingConfig,
    splitter: TextSplitter<text_splitter::Characters>,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        let chunk_config = ChunkConfig::new(config.chunk_size)
            .with_overlap(config.chunk_overlap)
            .map_err(|e| AppError::Configuration {
                message: format!("invalid chunking configuration: {}", e),
            })?;

        Ok(Self {
            splitter: TextSplitter::new(chunk_config),
            config,
        })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Split text into chunks. Blank text yields no chunks.
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let raw: Vec<(usize, &str)> = self
            .splitter
            .chunk_indices(text)
            .filter(|(_, chunk)| !chunk.trim().is_empty())
            .collect();

        let min = self.config.min_chunk_chars;
        let kept: Vec<(usize, &str)> = if raw.len() > 1 {
            let long_enough: Vec<(usize, &str)> = raw
                .iter()
                .copied()
                .filter(|(_, chunk)| chunk.chars().count() >= min)
                .collect();
            if long_enough.is_empty() {
                raw.into_iter().take(1).collect()
            } else {
                long_enough
            }
        } else {
            raw
        };

        debug!(
            input_len = text.len(),
            chunk_count = kept.len(),
            chunk_size = self.config.chunk_size,
            "Text chunked"
        );

        kept.into_iter()
            .enumerate()
            .map(|(index, (start_pos, content))| TextChunk {
                content: content.to_string(),
                index,
                start_pos,
            })
            .collect()
    }
}

//! Local feature-hashing embedder
//!
//! Hashes normalized tokens into a fixed-size count vector and L2-normalizes it.
//! Fully deterministic: the same text always yields the same bits, across
//! processes and platforms, which keeps persisted indexes reusable without a
//! network model.

use super::Embedder;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Words that carry no retrieval signal in questions about the corpus
const STOPWORDS: &[&str] = &[
    "a", "about", "all", "an", "and", "any", "are", "as", "at", "be", "by", "can", "could",
    "did", "do", "does", "for", "from", "give", "had", "has", "have", "how", "i", "in", "into",
    "is", "it", "its", "know", "list", "me", "of", "on", "or", "please", "show", "tell", "that",
    "the", "their", "there", "this", "to", "was", "were", "what", "when", "where", "which",
    "who", "why", "with", "would", "you", "your",
];

/// Deterministic hashing embedder
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    model: String,
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(model: impl Into<String>, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(AppError::Configuration {
                message: "embedding dimension must be greater than zero".to_string(),
            });
        }
        Ok(Self {
            model: model.into(),
            dimension,
        })
    }

    /// Embed synchronously. Text without any content token maps to the zero vector.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            vector[self.bucket(&token)] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }

        vector
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(prefix) % self.dimension as u64) as usize
    }
}

/// Lowercased alphanumeric tokens without stopwords, crude plural folding
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .map(fold_plural)
}

fn fold_plural(token: String) -> String {
    let folds = token.len() > 4
        && token.ends_with('s')
        && !token.ends_with("ss")
        && !token.ends_with("us")
        && !token.ends_with("is");
    if folds {
        token[..token.len() - 1].to_string()
    } else {
        token
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_reembedding_is_bit_identical() {
        let embedder = HashingEmbedder::new("vedika-hash-v1", 384).unwrap();
        let text = "Chandrayaan-3 landed near the lunar south pole.";

        let first = embedder.embed_text(text);
        let second = embedder.embed_text(text);

        assert_eq!(first.len(), 384);
        let first_bits: Vec<u32> = first.iter().map(|v| v.to_bits()).collect();
        let second_bits: Vec<u32> = second.iter().map(|v| v.to_bits()).collect();
        assert_eq!(first_bits, second_bits);
    }

    #[test]
    fn test_vectors_are_unit_length() {
        let embedder = HashingEmbedder::new("vedika-hash-v1", 64).unwrap();
        let v = embedder.embed_text("Polar Satellite Launch Vehicle");
        let norm = cosine(&v, &v).sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_stopwords_only_gives_zero_vector() {
        let embedder = HashingEmbedder::new("vedika-hash-v1", 64).unwrap();
        assert!(embedder.embed_text("tell me about it").iter().all(|v| *v == 0.0));
        assert!(embedder.embed_text("   ").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_plural_folding_matches_singular() {
        let embedder = HashingEmbedder::new("vedika-hash-v1", 256).unwrap();
        let a = embedder.embed_text("missions");
        let b = embedder.embed_text("mission");
        assert_eq!(a, b);
    }

    #[test]
    fn test_shared_terms_are_closer() {
        let embedder = HashingEmbedder::new("vedika-hash-v1", 384).unwrap();
        let query = embedder.embed_text("Mars orbiter mission");
        let related = embedder.embed_text("Mars Orbiter Mission (Mangalyaan) reached Mars orbit in 2014.");
        let unrelated = embedder.embed_text("Satish Dhawan Space Centre, Sriharikota");
        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(HashingEmbedder::new("vedika-hash-v1", 0).is_err());
    }

    #[tokio::test]
    async fn test_batch_matches_single() {
        let embedder = HashingEmbedder::new("vedika-hash-v1", 128).unwrap();
        let texts = vec!["GSLV Mk III".to_string(), "Aryabhata".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch[1], embedder.embed("Aryabhata").await.unwrap());
        assert_eq!(embedder.model_version(), "vedika-hash-v1@128");
    }
}

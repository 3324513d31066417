//! Vector index over record chunks
//!
//! - `builder`: records -> chunks -> embeddings -> [`VectorIndex`]
//! - `store`: JSON persistence with a manifest fingerprint
//! - `maintainer`: load-or-rebuild, atomic publish through [`CorpusHandle`]

mod builder;
mod chunker;
mod maintainer;
mod metadata;
mod store;

pub use builder::IndexBuilder;
pub use chunker::{Chunker, ChunkingConfig, TextChunk};
pub use maintainer::{IndexMaintainer, RefreshOutcome};
pub use metadata::{DocumentMetadata, MAX_EXTRA_VALUE_CHARS, WELL_KNOWN_KEYS};
pub use store::IndexStore;

use crate::records::{RecordId, RecordStore};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Bumped whenever the persisted layout changes
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// Distance function the index was built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Cosine,
}

/// Everything that must match for a persisted index to be reused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexFingerprint {
    pub model_version: String,
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_chars: usize,
    /// SHA-256 of the snapshot the index was built from
    pub corpus_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub build_id: Uuid,
    pub built_at: DateTime<Utc>,
    pub fingerprint: IndexFingerprint,
    pub record_count: usize,
    pub entry_count: usize,
}

/// One embedded chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// `{record_id}#{chunk_index}`
    pub id: String,
    pub record_id: RecordId,
    pub chunk_index: usize,
    pub content: String,
    pub metadata: DocumentMetadata,
    pub vector: Vec<f32>,
}

/// Immutable set of entries plus the manifest describing how they were built
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    manifest: IndexManifest,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Placeholder published before the first build completes
    pub fn empty(fingerprint: IndexFingerprint) -> Self {
        Self {
            manifest: IndexManifest {
                format_version: INDEX_FORMAT_VERSION,
                build_id: Uuid::nil(),
                built_at: Utc::now(),
                fingerprint,
                record_count: 0,
                entry_count: 0,
            },
            entries: Vec::new(),
        }
    }

    pub fn new(manifest: IndexManifest, entries: Vec<IndexEntry>) -> std::result::Result<Self, String> {
        let index = Self { manifest, entries };
        index.check_consistency()?;
        Ok(index)
    }

    /// Structural checks shared by freshly built and loaded indexes
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        let dimension = self.manifest.fingerprint.dimension;
        if self.manifest.entry_count != self.entries.len() {
            return Err(format!(
                "manifest lists {} entries, found {}",
                self.manifest.entry_count,
                self.entries.len()
            ));
        }
        for entry in &self.entries {
            if entry.vector.len() != dimension {
                return Err(format!(
                    "entry {} has {} dimensions, index declares {}",
                    entry.id,
                    entry.vector.len(),
                    dimension
                ));
            }
            if entry.vector.iter().any(|v| !v.is_finite()) {
                return Err(format!("entry {} has a non-finite vector component", entry.id));
            }
            entry
                .metadata
                .validate()
                .map_err(|e| format!("entry {}: {}", entry.id, e))?;
        }
        Ok(())
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn fingerprint(&self) -> &IndexFingerprint {
        &self.manifest.fingerprint
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn model_version(&self) -> &str {
        &self.manifest.fingerprint.model_version
    }

    pub fn dimension(&self) -> usize {
        self.manifest.fingerprint.dimension
    }

    /// True until a real build or load has been published
    pub fn is_placeholder(&self) -> bool {
        self.manifest.build_id.is_nil()
    }
}

/// Records and the index built from them, always swapped together
#[derive(Debug)]
pub struct Corpus {
    pub records: RecordStore,
    pub index: VectorIndex,
}

impl Corpus {
    pub fn new(records: RecordStore, index: VectorIndex) -> Self {
        Self { records, index }
    }

    pub fn empty(fingerprint: IndexFingerprint) -> Self {
        Self::new(RecordStore::default(), VectorIndex::empty(fingerprint))
    }
}

/// Shared pointer to the active corpus.
///
/// Readers take a snapshot with [`CorpusHandle::current`] and keep it for the
/// whole request; a publish never affects requests already in flight.
#[derive(Clone)]
pub struct CorpusHandle {
    inner: Arc<ArcSwap<Corpus>>,
}

impl CorpusHandle {
    pub fn new(corpus: Corpus) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(corpus)),
        }
    }

    pub fn current(&self) -> Arc<Corpus> {
        self.inner.load_full()
    }

    pub fn publish(&self, corpus: Corpus) {
        self.inner.store(Arc::new(corpus));
    }
}

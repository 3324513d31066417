//! On-disk persistence for the vector index

use super::{VectorIndex, INDEX_FORMAT_VERSION};
use crate::errors::{AppError, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// JSON file holding one [`VectorIndex`]
#[derive(Debug, Clone)]
pub struct IndexStore {
    path: PathBuf,
}

impl IndexStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted index. `None` when there is nothing usable on disk
    /// (missing file, older format); an unreadable file is an error.
    pub async fn load(&self) -> Result<Option<VectorIndex>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::Retrieval {
                    message: format!("cannot read index {}: {}", self.path.display(), e),
                })
            }
        };

        let index: VectorIndex = serde_json::from_slice(&bytes).map_err(|e| AppError::Retrieval {
            message: format!("index {} is corrupt: {}", self.path.display(), e),
        })?;

        if index.manifest().format_version != INDEX_FORMAT_VERSION {
            warn!(
                path = %self.path.display(),
                found = index.manifest().format_version,
                expected = INDEX_FORMAT_VERSION,
                "Persisted index uses another format version"
            );
            return Ok(None);
        }

        index.check_consistency().map_err(|e| AppError::Retrieval {
            message: format!("index {} is corrupt: {}", self.path.display(), e),
        })?;

        Ok(Some(index))
    }

    /// Write through a temporary file and rename, so readers never see a partial index
    pub async fn save(&self, index: &VectorIndex) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec(index)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        info!(
            path = %self.path.display(),
            build_id = %index.manifest().build_id,
            entries = index.len(),
            bytes = bytes.len(),
            "Index persisted"
        );
        Ok(())
    }
}

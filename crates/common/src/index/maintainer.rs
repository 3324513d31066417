//! Keeps the published corpus in step with the snapshot on disk

use super::{Corpus, CorpusHandle, IndexBuilder, IndexStore};
use crate::config::AppConfig;
use crate::embeddings::Embedder;
use crate::errors::Result;
use crate::metrics;
use crate::records::{snapshot_hash, RecordStore};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// What a refresh did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// The active corpus already matched the snapshot
    Unchanged,
    /// A persisted index matched and was published
    Loaded,
    /// A new index was built, persisted and published
    Rebuilt,
}

impl RefreshOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshOutcome::Unchanged => "unchanged",
            RefreshOutcome::Loaded => "loaded",
            RefreshOutcome::Rebuilt => "rebuilt",
        }
    }
}

pub struct IndexMaintainer {
    snapshot_dir: PathBuf,
    store: IndexStore,
    builder: IndexBuilder,
    handle: CorpusHandle,
    // One build at a time; readers never wait on it
    rebuild_lock: Mutex<()>,
}

impl IndexMaintainer {
    pub fn new(config: &AppConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let builder = IndexBuilder::from_config(embedder, config)?;
        let handle = CorpusHandle::new(Corpus::empty(builder.fingerprint("")));
        Ok(Self {
            snapshot_dir: config.snapshot.data_dir.clone(),
            store: IndexStore::new(config.index.path.clone()),
            builder,
            handle,
            rebuild_lock: Mutex::new(()),
        })
    }

    /// Handle readers use to reach the active corpus
    pub fn handle(&self) -> &CorpusHandle {
        &self.handle
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn builder(&self) -> &IndexBuilder {
        &self.builder
    }

    /// Bring the active corpus up to date with the snapshot.
    ///
    /// Without `force`, a published or persisted index whose fingerprint matches
    /// is reused. On failure the previously published corpus stays active.
    pub async fn refresh(&self, force: bool) -> Result<RefreshOutcome> {
        let _guard = self.rebuild_lock.lock().await;

        let result = self.refresh_locked(force).await;
        match &result {
            Ok(outcome) => {
                metrics::record_index_build(self.handle.current().index.len(), outcome.as_str());
            }
            Err(e) => {
                error!(error = %e, "Index refresh failed, keeping the active corpus");
                metrics::record_index_build(self.handle.current().index.len(), "failed");
            }
        }
        result
    }

    async fn refresh_locked(&self, force: bool) -> Result<RefreshOutcome> {
        let records = RecordStore::load(&self.snapshot_dir).await?;
        let expected = self.builder.fingerprint(records.content_hash());

        if !force {
            let active = self.handle.current();
            if !active.index.is_placeholder() && active.index.fingerprint() == &expected {
                return Ok(RefreshOutcome::Unchanged);
            }

            match self.store.load().await {
                Ok(Some(index)) if index.fingerprint() == &expected => {
                    info!(
                        build_id = %index.manifest().build_id,
                        entries = index.len(),
                        "Reusing persisted index"
                    );
                    self.handle.publish(Corpus::new(records, index));
                    return Ok(RefreshOutcome::Loaded);
                }
                Ok(Some(index)) => {
                    info!(
                        persisted = %index.model_version(),
                        expected = %expected.model_version,
                        "Persisted index is stale, rebuilding"
                    );
                }
                Ok(None) => info!(path = %self.store.path().display(), "No persisted index, building"),
                Err(e) => warn!(error = %e, "Persisted index unusable, rebuilding"),
            }
        }

        let index = self.builder.build(&records).await?;
        self.store.save(&index).await?;
        self.handle.publish(Corpus::new(records, index));
        Ok(RefreshOutcome::Rebuilt)
    }

    /// Whether the snapshot on disk differs from the one the active corpus was built from
    pub async fn snapshot_changed(&self) -> Result<bool> {
        let hash = snapshot_hash(&self.snapshot_dir).await?;
        Ok(self.handle.current().index.fingerprint().corpus_hash != hash)
    }

    /// Poll the snapshot and refresh when it changes. Runs until the task is dropped.
    pub async fn watch(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match self.snapshot_changed().await {
                Ok(true) => {
                    info!("Snapshot changed, refreshing index");
                    if let Ok(outcome) = self.refresh(false).await {
                        info!(outcome = outcome.as_str(), "Snapshot refresh finished");
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Cannot hash snapshot"),
            }
        }
    }
}

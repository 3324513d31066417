//! Index maintenance handler

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use vedika_common::{errors::Result, index::RefreshOutcome};

use super::rejection_error;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RebuildParams {
    /// Rebuild even when the snapshot is unchanged
    #[serde(default)]
    pub force: bool,
}

#[derive(Serialize)]
pub struct RebuildResponse {
    pub outcome: RefreshOutcome,
    pub build_id: String,
    pub built_at: DateTime<Utc>,
    pub records: usize,
    pub entries: usize,
    pub corpus_hash: String,
    pub duration_ms: u64,
}

/// Refresh the corpus from the snapshot directory.
/// A failed build leaves the previous corpus serving.
pub async fn rebuild(
    State(state): State<AppState>,
    params: std::result::Result<Query<RebuildParams>, QueryRejection>,
) -> Result<Json<RebuildResponse>> {
    let start = Instant::now();
    let Query(params) = params.map_err(|rejection| rejection_error(rejection.body_text()))?;

    let outcome = state.maintainer.refresh(params.force).await?;
    let corpus = state.maintainer.handle().current();
    let manifest = corpus.index.manifest();

    tracing::info!(
        outcome = outcome.as_str(),
        build_id = %manifest.build_id,
        entries = manifest.entry_count,
        "Index refresh requested"
    );

    Ok(Json(RebuildResponse {
        outcome,
        build_id: manifest.build_id.to_string(),
        built_at: manifest.built_at,
        records: corpus.records.len(),
        entries: corpus.index.len(),
        corpus_hash: manifest.fingerprint.corpus_hash.clone(),
        duration_ms: start.elapsed().as_millis() as u64,
    }))
}

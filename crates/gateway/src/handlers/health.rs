//! Health check handlers

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use vedika_common::context::BackendStatus;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: &'static str,
    pub index: IndexStatus,
    pub generator: GeneratorStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct IndexStatus {
    pub loaded: bool,
    pub records: usize,
    pub entries: usize,
    pub model_version: String,
    pub build_id: String,
    pub built_at: DateTime<Utc>,
    pub corpus_hash: String,
}

#[derive(Serialize)]
pub struct GeneratorStatus {
    pub model: String,
    pub remote: bool,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub index: CheckResult,
    pub generator: BackendStatus,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn index_status(state: &AppState) -> IndexStatus {
    let corpus = state.maintainer.handle().current();
    let manifest = corpus.index.manifest();
    IndexStatus {
        loaded: !corpus.index.is_placeholder(),
        records: corpus.records.len(),
        entries: corpus.index.len(),
        model_version: corpus.index.model_version().to_string(),
        build_id: manifest.build_id.to_string(),
        built_at: manifest.built_at,
        corpus_hash: manifest.fingerprint.corpus_hash.clone(),
    }
}

/// Liveness probe with a summary of the active corpus
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let index = index_status(&state);
    let generator = state.pipeline.generator();

    Json(HealthResponse {
        status: if index.loaded { "healthy" } else { "unhealthy" }.to_string(),
        version: vedika_common::VERSION,
        index,
        generator: GeneratorStatus {
            model: generator.model_name().to_string(),
            remote: generator.is_remote(),
        },
        timestamp: Utc::now(),
    })
}

/// Readiness probe - checks the corpus and the generation backend
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let index = index_status(&state);
    let index_check = if index.loaded {
        CheckResult {
            status: "up".to_string(),
            error: None,
        }
    } else {
        CheckResult {
            status: "down".to_string(),
            error: Some("no index has been published".to_string()),
        }
    };

    let generator_check = state.pipeline.check_backend().await;
    let all_ready = index.loaded && generator_check.is_available();

    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyResponse {
            status: if all_ready { "ready" } else { "not_ready" }.to_string(),
            checks: HealthChecks {
                index: index_check,
                generator: generator_check,
            },
        }),
    )
}

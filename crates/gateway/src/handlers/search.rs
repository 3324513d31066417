//! Raw retrieval handler

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use vedika_common::{errors::Result, retrieval::RetrievedDocument};

use super::rejection_error;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub query: String,
    pub max_results: Option<usize>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub count: usize,
    pub results: Vec<RetrievedDocument>,
    pub processing_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Nearest chunks for a query, without generation
pub async fn search(
    State(state): State<AppState>,
    params: std::result::Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<SearchResponse>> {
    let start = Instant::now();
    let Query(params) = params.map_err(|rejection| rejection_error(rejection.body_text()))?;
    let k = params
        .max_results
        .unwrap_or(state.config.retrieval.default_max_results);

    let results = state.pipeline.search(&params.query, k).await?;

    Ok(Json(SearchResponse {
        count: results.len(),
        query: params.query,
        results,
        processing_time_ms: start.elapsed().as_millis() as u64,
        timestamp: Utc::now(),
    }))
}

#[cfg(test)]
mod tests {
    use crate::test_support::test_app;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_search_ranks_by_distance() {
        let app = test_app(|_| {}).await;
        let (status, body) = app.get("/search?query=Mars%20orbit&max_results=2").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        let results = body["results"].as_array().unwrap();
        assert_eq!(results[0]["record_id"], "spacecrafts:60");
        let first = results[0]["distance"].as_f64().unwrap();
        let second = results[1]["distance"].as_f64().unwrap();
        assert!(first <= second);
    }

    #[tokio::test]
    async fn test_search_default_limit() {
        let app = test_app(|config| config.retrieval.default_max_results = 1).await;
        let (status, body) = app.get("/search?query=mission").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
    }

    #[tokio::test]
    async fn test_search_missing_query_is_400() {
        let app = test_app(|_| {}).await;
        let (status, body) = app.get("/search").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_search_limit_out_of_range_is_400() {
        let app = test_app(|_| {}).await;
        let (status, body) = app.get("/search?query=PSLV&max_results=0").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["details"]["field"], "max_results");
    }
}

//! Question answering handler

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use vedika_common::{errors::Result, ChatQuery, ChatResponse};

use super::rejection_error;
use crate::AppState;

/// Answer a question from the indexed records
pub async fn query(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ChatQuery>, JsonRejection>,
) -> Result<Json<ChatResponse>> {
    let Json(query) = payload.map_err(|rejection| rejection_error(rejection.body_text()))?;

    tracing::info!(
        query_len = query.query.chars().count(),
        max_results = query.max_results,
        "Query received"
    );

    let response = state.pipeline.answer(query).await?;
    Ok(Json(response))
}

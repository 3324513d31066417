//! Record lookup handler

use axum::{
    extract::{Path, State},
    Json,
};
use vedika_common::{
    errors::{AppError, Result},
    Record, RecordId,
};

use crate::AppState;

/// Full record by id, e.g. `spacecrafts:123`
pub async fn get_record(
    State(state): State<AppState>,
    Path(record_id): Path<String>,
) -> Result<Json<Record>> {
    let corpus = state.maintainer.handle().current();
    corpus
        .records
        .get(&RecordId::from(record_id.as_str()))
        .cloned()
        .map(Json)
        .ok_or(AppError::NotFound {
            resource_type: "record".to_string(),
            id: record_id,
        })
}

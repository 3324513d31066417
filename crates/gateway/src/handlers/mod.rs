//! API handlers module

pub mod health;
pub mod index;
pub mod query;
pub mod records;
pub mod search;

use axum::Json;
use serde::Serialize;
use vedika_common::errors::AppError;

#[derive(Serialize)]
pub struct RootResponse {
    pub message: &'static str,
    pub version: &'static str,
}

/// Service banner
pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Vedika - ISRO Knowledge Assistant API",
        version: vedika_common::VERSION,
    })
}

/// Extractor rejections are client errors in the common error shape
pub(crate) fn rejection_error(message: String) -> AppError {
    AppError::Validation { message, field: None }
}

#[cfg(test)]
mod tests {
    use crate::test_support::test_app;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_root_banner() {
        let app = test_app(|_| {}).await;
        let (status, body) = app.get("/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], vedika_common::VERSION);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = test_app(|_| {}).await;
        assert_eq!(app.get("/nope").await.0, StatusCode::NOT_FOUND);
    }
}

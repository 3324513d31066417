//! Request admission: global token bucket and concurrency cap

use axum::{extract::Request, middleware::Next, response::Response};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::Semaphore;
use vedika_common::errors::AppError;

/// Rate limiter using governor crate
pub type GlobalRateLimiter = DefaultDirectRateLimiter;

/// Create a new rate limiter. `None` when either value is zero.
pub fn create_rate_limiter(requests_per_second: u32, burst: u32) -> Option<Arc<GlobalRateLimiter>> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second)?).allow_burst(NonZeroU32::new(burst)?);
    Some(Arc::new(RateLimiter::direct(quota)))
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    request: Request,
    next: Next,
    limiter: Arc<GlobalRateLimiter>,
    limit: u32,
) -> Result<Response, AppError> {
    match limiter.check() {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
            Err(AppError::RateLimited { limit })
        }
    }
}

/// Holds a permit for the lifetime of the request; excess requests wait
pub async fn concurrency_limit_middleware(
    request: Request,
    next: Next,
    permits: Arc<Semaphore>,
) -> Result<Response, AppError> {
    let _permit = permits.acquire_owned().await.map_err(|_| AppError::Internal {
        message: "request admission closed".to_string(),
    })?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_app;
    use axum::http::StatusCode;

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = create_rate_limiter(100, 200).unwrap();
        assert!(limiter.check().is_ok());
        assert!(create_rate_limiter(0, 10).is_none());
    }

    #[tokio::test]
    async fn test_burst_exhaustion_returns_429() {
        let app = test_app(|config| {
            config.rate_limit.requests_per_second = 1;
            config.rate_limit.burst = 2;
        })
        .await;

        assert_eq!(app.get("/health").await.0, StatusCode::OK);
        assert_eq!(app.get("/health").await.0, StatusCode::OK);

        let (status, body) = app.get("/health").await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"]["code"], "RATE_LIMITED");
    }

    #[tokio::test]
    async fn test_disabled_rate_limit() {
        let app = test_app(|config| {
            config.rate_limit.enabled = false;
            config.rate_limit.requests_per_second = 1;
            config.rate_limit.burst = 1;
        })
        .await;

        for _ in 0..5 {
            assert_eq!(app.get("/health").await.0, StatusCode::OK);
        }
    }
}

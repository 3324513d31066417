//! Attempt classification and backoff for the remote backends

use rand::Rng;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Why one request attempt failed
#[derive(Debug, Error)]
pub(crate) enum AttemptFailure {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("backend returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl AttemptFailure {
    pub(crate) fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            AttemptFailure::Timeout(timeout)
        } else if e.is_builder() {
            AttemptFailure::InvalidRequest(e.to_string())
        } else {
            AttemptFailure::Connect(e.to_string())
        }
    }

    /// Non-success response, body capped for logs and error messages
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        AttemptFailure::Status {
            status,
            body: body.chars().take(500).collect(),
        }
    }

    /// Transient failures worth another attempt
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            AttemptFailure::Timeout(_) | AttemptFailure::Connect(_) => true,
            AttemptFailure::Status { status, .. } => {
                *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || status.is_server_error()
            }
            AttemptFailure::InvalidRequest(_) | AttemptFailure::Malformed(_) => false,
        }
    }

    pub(crate) fn is_timeout(&self) -> bool {
        matches!(self, AttemptFailure::Timeout(_))
            || matches!(self, AttemptFailure::Status { status, .. } if *status == StatusCode::GATEWAY_TIMEOUT)
    }
}

/// Delay before attempt `attempt + 1`: `base * 2^(attempt-1)`, capped, plus up to 10% of base as jitter
pub(crate) fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponential = base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(20));
    let capped = exponential.min(max_ms);
    let jitter = if base_ms >= 10 {
        rand::thread_rng().gen_range(0..=base_ms / 10)
    } else {
        0
    };
    Duration::from_millis(capped + jitter)
}

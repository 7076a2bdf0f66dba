//! External annotation API client.
//!
//! Wraps the metered alt-text generation service: request/response types,
//! status classification, and a bounded retry/backoff policy.

mod client;
mod retry;
mod types;

pub use client::{AltTextClient, ApiConfig};
pub use retry::RetryPolicy;
pub use types::{AccountInfo, Annotation, ImageSource, SubmitOptions};

use async_trait::async_trait;
use thiserror::Error;

use crate::models::WorkItem;

/// Errors from a single logical submission (after retries).
#[derive(Debug, Error)]
pub enum ApiError {
    /// The metered account has no remaining usage. Terminal for the run.
    #[error("account quota exhausted: {0}")]
    QuotaExhausted(String),

    /// The service could not retrieve the image by URL (network policy).
    /// The caller should suggest switching to raw-payload uploads.
    #[error("image fetch blocked: {0}")]
    FetchBlocked(String),

    /// Client/auth error; never retried.
    #[error("API rejected request (HTTP {status}): {message}")]
    Hard { status: u16, message: String },

    /// Retry budget exhausted on a retryable condition.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// Transport-level failure that is not safe to retry.
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body did not match the expected shape.
    #[error("unexpected response: {0}")]
    Parse(String),
}

impl ApiError {
    /// Map to the stop reason this error forces on the run, if any.
    pub fn stop_reason(&self) -> crate::models::StopReason {
        match self {
            ApiError::QuotaExhausted(_) => crate::models::StopReason::QuotaExhausted,
            ApiError::FetchBlocked(_) => crate::models::StopReason::FetchBlocked,
            _ => crate::models::StopReason::None,
        }
    }
}

/// Seam between the coordinator and the external service, so tests can
/// script responses without a network.
#[async_trait]
pub trait AnnotationBackend: Send + Sync {
    /// Submit one image for annotation. Retries internally per policy.
    async fn submit(
        &self,
        item: &WorkItem,
        source: ImageSource,
        options: &SubmitOptions,
    ) -> Result<Annotation, ApiError>;
}

/// Statuses worth retrying: rate-limited, unavailable, and timeouts reported
/// by the server side.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 503 | 504)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        for status in [408u16, 429, 503, 504] {
            assert!(is_retryable_status(status), "{} should retry", status);
        }
        for status in [400u16, 401, 403, 404, 422, 500] {
            assert!(!is_retryable_status(status), "{} should not retry", status);
        }
    }

    #[test]
    fn business_errors_map_to_stop_reasons() {
        use crate::models::StopReason;
        assert_eq!(
            ApiError::QuotaExhausted("no credits".into()).stop_reason(),
            StopReason::QuotaExhausted
        );
        assert_eq!(
            ApiError::FetchBlocked("firewall".into()).stop_reason(),
            StopReason::FetchBlocked
        );
        assert_eq!(
            ApiError::Hard {
                status: 401,
                message: "bad key".into()
            }
            .stop_reason(),
            StopReason::None
        );
    }
}

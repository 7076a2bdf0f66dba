//! HTTP client for the alt-text generation service.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::WorkItem;

use super::retry::RetryPolicy;
use super::types::{AccountInfo, Annotation, ErrorBody, ImageSource, SubmitBody, SubmitOptions};
use super::{is_retryable_status, AnnotationBackend, ApiError};

/// Configuration for the annotation API client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Service endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// API key; falls back to the ALTGEN_API_KEY environment variable.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retry policy for retryable failures.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_endpoint() -> String {
    "https://api.alttext.ai/v2".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ApiConfig {
    /// Resolve the API key from config or environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("ALTGEN_API_KEY").ok())
    }
}

/// Outcome of a single wire attempt, before retry policy is applied.
enum AttemptError {
    /// Worth retrying with backoff.
    Retryable(String),
    /// Propagate immediately.
    Fatal(ApiError),
}

/// Client for the metered annotation service.
pub struct AltTextClient {
    config: ApiConfig,
    client: Client,
}

impl AltTextClient {
    pub fn new(config: ApiConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        Self { config, client }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Fetch account usage for quota display.
    pub async fn account(&self) -> Result<AccountInfo, ApiError> {
        let url = format!("{}/account", self.config.endpoint);
        let resp = self
            .request(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Hard {
                status: status.as_u16(),
                message: body,
            });
        }
        resp.json()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.resolve_api_key() {
            Some(key) => builder.header("X-API-Key", key),
            None => builder,
        }
    }

    /// One wire attempt against `POST /images`.
    async fn try_submit(
        &self,
        body: &SubmitBody,
    ) -> Result<Annotation, AttemptError> {
        let url = format!("{}/images", self.config.endpoint);
        let resp = match self.request(self.client.post(&url)).json(body).send().await {
            Ok(resp) => resp,
            Err(e) if e.is_connect() => {
                // Never reached the server, safe to retry.
                return Err(AttemptError::Retryable(format!("connect error: {}", e)));
            }
            Err(e) => {
                // A timeout here is ambiguous: the request may have been
                // charged server-side. Without an upstream idempotency token
                // a replay risks a double charge, so we surface instead.
                return Err(AttemptError::Fatal(ApiError::Transport(e.to_string())));
            }
        };

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<Annotation>()
                .await
                .map_err(|e| AttemptError::Fatal(ApiError::Parse(e.to_string())));
        }

        if status == StatusCode::UNPROCESSABLE_ENTITY {
            let body: ErrorBody = resp.json().await.unwrap_or(ErrorBody { errors: vec![] });
            return Err(AttemptError::Fatal(classify_unprocessable(&body.errors)));
        }

        let code = status.as_u16();
        let message = resp.text().await.unwrap_or_default();
        if is_retryable_status(code) {
            Err(AttemptError::Retryable(format!("HTTP {}: {}", code, message)))
        } else {
            Err(AttemptError::Fatal(ApiError::Hard {
                status: code,
                message,
            }))
        }
    }
}

#[async_trait]
impl AnnotationBackend for AltTextClient {
    async fn submit(
        &self,
        item: &WorkItem,
        source: ImageSource,
        options: &SubmitOptions,
    ) -> Result<Annotation, ApiError> {
        let body = SubmitBody {
            image: (&source).into(),
            options: options.clone(),
        };

        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.try_submit(&body).await {
                Ok(annotation) => {
                    debug!(item_id = item.id, attempts, "annotation generated");
                    return Ok(annotation);
                }
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Retryable(cause)) => {
                    if !self.config.retry.allows_retry(attempts, started.elapsed()) {
                        return Err(ApiError::RetriesExhausted {
                            attempts,
                            last: cause,
                        });
                    }
                    let delay = self.config.retry.jittered_delay(attempts);
                    warn!(
                        item_id = item.id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "retryable API failure: {}",
                        cause
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Map 422 error strings onto business errors. Insufficient quota and
/// blocked URL fetches get distinct signals; everything else is a hard
/// unprocessable error.
fn classify_unprocessable(errors: &[String]) -> ApiError {
    let joined = errors.join("; ");
    let lowered = joined.to_lowercase();
    if lowered.contains("quota")
        || lowered.contains("credit")
        || lowered.contains("usage limit")
        || lowered.contains("insufficient")
    {
        return ApiError::QuotaExhausted(joined);
    }
    if (lowered.contains("fetch")
        || lowered.contains("retrieve")
        || lowered.contains("download"))
        && (lowered.contains("url") || lowered.contains("image"))
    {
        return ApiError::FetchBlocked(joined);
    }
    ApiError::Hard {
        status: 422,
        message: joined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_messages_map_to_quota_exhausted() {
        let err = classify_unprocessable(&["Insufficient credits for this request".into()]);
        assert!(matches!(err, ApiError::QuotaExhausted(_)));

        let err = classify_unprocessable(&["Monthly usage limit reached".into()]);
        assert!(matches!(err, ApiError::QuotaExhausted(_)));
    }

    #[test]
    fn fetch_failures_map_to_fetch_blocked() {
        let err = classify_unprocessable(&["Could not fetch image from URL".into()]);
        assert!(matches!(err, ApiError::FetchBlocked(_)));

        let err = classify_unprocessable(&["Unable to retrieve the image".into()]);
        assert!(matches!(err, ApiError::FetchBlocked(_)));
    }

    #[test]
    fn other_422s_stay_hard_errors() {
        let err = classify_unprocessable(&["Image format not recognized".into()]);
        assert!(matches!(err, ApiError::Hard { status: 422, .. }));
    }

    #[test]
    fn api_key_resolution_prefers_config() {
        let config = ApiConfig {
            api_key: Some("from-config".into()),
            ..ApiConfig::default()
        };
        assert_eq!(config.resolve_api_key().as_deref(), Some("from-config"));
    }
}

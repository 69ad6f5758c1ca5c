use super::batch::PushRequest;
use crate::config::types::{BackoffConfig, ClientConfig};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

const TENANT_HEADER: &str = "X-Scope-OrgID";

#[derive(Debug, Error)]
pub enum PushError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sink returned error status {status}: {message}")]
    Status { status: u16, message: String },
}

impl PushError {
    /// Connection failures, timeouts, 429 and 5xx are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            PushError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            PushError::Json(_) => false,
            PushError::Status { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("max retries exceeded after {attempts} attempts: {last}")]
    MaxRetriesExceeded {
        attempts: usize,
        #[source]
        last: PushError,
    },

    #[error("rejected by sink: {0}")]
    Rejected(#[source] PushError),
}

/// Destination of push requests
#[async_trait]
pub trait PushSink: Send + Sync {
    async fn push(&self, request: &PushRequest) -> Result<(), PushError>;

    fn endpoint(&self) -> &str;
}

/// Pushes JSON payloads over HTTP
#[derive(Debug)]
pub struct HttpPushClient {
    url: String,
    tenant_id: Option<String>,
    client: reqwest::Client,
}

impl HttpPushClient {
    pub fn new(config: &ClientConfig) -> Result<Self, PushError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            url: config.url.clone(),
            tenant_id: config.tenant_id.clone(),
            client,
        })
    }
}

#[async_trait]
impl PushSink for HttpPushClient {
    async fn push(&self, request: &PushRequest) -> Result<(), PushError> {
        let body = serde_json::to_vec(request)?;

        let mut builder = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(tenant) = &self.tenant_id {
            builder = builder.header(TENANT_HEADER, tenant);
        }

        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(PushError::Status {
            status: status.as_u16(),
            message,
        })
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

/// Push with exponential backoff. Returns the number of attempts on success.
pub async fn push_with_retry(
    sink: &dyn PushSink,
    request: &PushRequest,
    policy: &BackoffConfig,
) -> Result<usize, DeliveryError> {
    let max_attempts = policy.max_retries.max(1);
    let mut attempts = 0;
    let mut backoff = policy.min_period;

    loop {
        attempts += 1;
        match sink.push(request).await {
            Ok(()) => return Ok(attempts),
            Err(e) if !e.is_retryable() => return Err(DeliveryError::Rejected(e)),
            Err(e) => {
                if attempts >= max_attempts {
                    return Err(DeliveryError::MaxRetriesExceeded { attempts, last: e });
                }

                tracing::warn!(
                    endpoint = %sink.endpoint(),
                    attempt = attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Push failed, retrying"
                );

                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff, policy.max_period);
            }
        }
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    std::cmp::min(current.saturating_mul(2), max)
}

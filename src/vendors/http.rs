//! Shared HTTP plumbing for vendor adapters.
//!
//! One `VendorHttpClient` per configured vendor: it owns the reqwest
//! client, the vendor token bucket, and the credential, and emits the
//! `vendor.request` / `vendor.response` / `vendor.error` events every
//! wire call produces. Secrets never appear in event fields.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde_json::Value;

use super::token_bucket::TokenBucket;
use super::VendorError;

/// Retry schedule for transient vendor failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub factor: u32,
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            base_delay: Duration::ZERO,
            factor: 1,
            max_attempts: 1,
        }
    }

    /// The standard vendor backoff: 500ms base, doubling, 4 attempts.
    pub fn backoff() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            factor: 2,
            max_attempts: 4,
        }
    }

    /// Delay before attempt `n + 1` (0-based `n`).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * self.factor.saturating_pow(attempt)
    }
}

/// HTTP client for one vendor endpoint.
#[derive(Clone)]
pub struct VendorHttpClient {
    vendor: String,
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    bucket: Arc<TokenBucket>,
}

impl VendorHttpClient {
    pub fn new(
        vendor: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: Option<String>,
        bucket: Arc<TokenBucket>,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            vendor: vendor.into(),
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            bucket,
        }
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    /// POST a JSON body and parse a JSON response. One attempt; the
    /// vendor bucket is acquired first, so bursts queue here.
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, VendorError> {
        self.bucket.acquire().await;

        let url = self.url(path);
        let body_bytes = serde_json::to_vec(body).unwrap_or_default();
        tracing::info!(
            vendor = %self.vendor,
            path = %path,
            request_bytes = body_bytes.len(),
            "vendor.request"
        );

        let start = Instant::now();
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                let err = if e.is_timeout() {
                    VendorError::VendorUnavailable("request timed out".to_string())
                } else {
                    VendorError::VendorUnavailable(format!("request failed: {e}"))
                };
                self.log_error(path, start, &err);
                return Err(err);
            }
        };

        let status = response.status().as_u16();
        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => {
                let err = VendorError::VendorUnavailable(format!("body read failed: {e}"));
                self.log_error(path, start, &err);
                return Err(err);
            }
        };

        if let Some(err) = classify_status(status) {
            self.log_error(path, start, &err);
            return Err(err);
        }

        tracing::info!(
            vendor = %self.vendor,
            path = %path,
            status,
            latency_ms = start.elapsed().as_millis() as u64,
            response_bytes = text.len(),
            "vendor.response"
        );

        serde_json::from_str(&text).map_err(|e| {
            let err = VendorError::SchemaViolation(format!("response was not JSON: {e}"));
            self.log_error(path, start, &err);
            err
        })
    }

    /// POST with retries on transient failures, per the policy.
    pub async fn post_json_retry(
        &self,
        path: &str,
        body: &Value,
        policy: RetryPolicy,
    ) -> Result<Value, VendorError> {
        let mut attempt = 0;
        loop {
            match self.post_json(path, body).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                    let delay = policy.delay_after(attempt);
                    tracing::debug!(
                        vendor = %self.vendor,
                        path = %path,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retrying transient vendor failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn log_error(&self, path: &str, start: Instant, err: &VendorError) {
        tracing::warn!(
            vendor = %self.vendor,
            path = %path,
            latency_ms = start.elapsed().as_millis() as u64,
            error = %err,
            "vendor.error"
        );
    }
}

/// Map a transport-level status to an error. In-band vendor error codes
/// are interpreted by each adapter; this only covers transport classes.
fn classify_status(status: u16) -> Option<VendorError> {
    match status {
        200..=299 => None,
        401 | 403 => Some(VendorError::AuthExpired),
        429 => Some(VendorError::QuotaExceeded),
        s if s >= 500 => Some(VendorError::VendorUnavailable(format!("status {s}"))),
        s => Some(VendorError::VendorUnavailable(format!("unexpected status {s}"))),
    }
}

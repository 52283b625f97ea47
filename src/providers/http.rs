use std::{fmt, time::Instant};

use anyhow::{Error, Result, anyhow};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::{
    error::DispatchError,
    models::{
        health::HealthRecord, message::RenderedPayload, provider::ProviderConfig,
        retry::RetryConfig, validation::validate_payload,
    },
    utils::retry_when,
};

/// Vendor answer classes before they are mapped onto `DispatchError`.
#[derive(Debug)]
pub enum VendorError {
    /// 4xx other than 429: the request itself is wrong.
    Rejected(String),
    /// 429: the vendor asked us to slow down.
    Throttled(String),
    /// 5xx, timeout or transport failure.
    Failed(String),
}

impl VendorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, VendorError::Throttled(_))
    }

    pub fn into_dispatch(self, provider: &str) -> DispatchError {
        match self {
            VendorError::Rejected(reason) => {
                DispatchError::InvalidRequest(format!("{} rejected request: {}", provider, reason))
            }
            VendorError::Throttled(reason) => {
                DispatchError::unavailable(provider, format!("throttled: {}", reason))
            }
            VendorError::Failed(reason) => DispatchError::unavailable(provider, reason),
        }
    }
}

impl fmt::Display for VendorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VendorError::Rejected(reason) => write!(f, "rejected: {}", reason),
            VendorError::Throttled(reason) => write!(f, "throttled: {}", reason),
            VendorError::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

impl From<reqwest::Error> for VendorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            VendorError::Rejected(e.to_string())
        } else {
            VendorError::Failed(e.to_string())
        }
    }
}

pub fn build_client(provider: &ProviderConfig) -> Result<Client, Error> {
    Client::builder()
        .timeout(provider.timeout())
        .build()
        .map_err(|e| anyhow!("Failed to create HTTP client for '{}': {}", provider.name, e))
}

/// Per-adapter retry policy: the provider's attempt count with the shared delays.
pub fn adapter_retry_config(provider: &ProviderConfig, base: &RetryConfig) -> RetryConfig {
    base.clone().with_max_attempts(provider.retry_count)
}

pub fn base_url(provider: &ProviderConfig, default: &str) -> String {
    provider
        .base_url
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

pub fn check_payload(provider: &ProviderConfig, payload: &RenderedPayload) -> Result<(), DispatchError> {
    validate_payload(provider.channel, payload)
        .map_err(|e| DispatchError::InvalidRequest(format!("{}: {}", provider.name, e)))
}

/// Turns a vendor response into its JSON body or a classified error.
pub async fn read_json(response: Response) -> Result<(StatusCode, JsonValue), VendorError> {
    let status = response.status();
    let text = response.text().await?;
    let body = serde_json::from_str::<JsonValue>(&text).unwrap_or(JsonValue::String(text));

    if status.is_success() {
        return Ok((status, body));
    }

    let reason = format!("status {}: {}", status.as_u16(), body);
    Err(if status == StatusCode::TOO_MANY_REQUESTS {
        VendorError::Throttled(reason)
    } else if status.is_client_error() {
        VendorError::Rejected(reason)
    } else {
        VendorError::Failed(reason)
    })
}

/// Runs one vendor call with the adapter-internal retry for throttling.
pub async fn call_with_retry<F, Fut, T>(
    provider: &str,
    retry_config: &RetryConfig,
    operation: F,
) -> Result<T, DispatchError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, VendorError>>,
{
    retry_when(retry_config, VendorError::is_transient, operation)
        .await
        .map_err(|e| {
            debug!(provider, error = %e, "Vendor call failed");
            e.into_dispatch(provider)
        })
}

/// Issues a probe request and turns the outcome into a health record.
/// `reachable` decides which status codes count as a live vendor.
pub async fn probe(
    provider: &str,
    request: RequestBuilder,
    reachable: fn(StatusCode) -> bool,
) -> HealthRecord {
    let started = Instant::now();
    let result = request.send().await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(response) if reachable(response.status()) => HealthRecord::healthy(provider, latency_ms),
        Ok(response) => {
            let status = response.status();
            warn!(provider, status = status.as_u16(), "Provider probe returned error status");
            HealthRecord::unhealthy(
                provider,
                latency_ms,
                format!("Probe returned status {}", status.as_u16()),
            )
        }
        Err(e) => {
            warn!(provider, error = %e, "Provider probe failed");
            HealthRecord::unhealthy(provider, latency_ms, format!("Probe failed: {}", e))
        }
    }
}

pub fn is_success(status: StatusCode) -> bool {
    status.is_success()
}

pub fn below_server_error(status: StatusCode) -> bool {
    !status.is_server_error()
}

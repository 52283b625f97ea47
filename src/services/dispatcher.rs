use std::sync::Arc;

use chrono::Utc;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, info, warn};

use crate::{
    clients::{
        audit::{AuditSink, record_detached},
        circuit_breaker::CircuitBreaker,
        history::AttemptHistory,
        rate_limiter::RateLimiter,
    },
    error::DispatchError,
    models::{
        delivery::{DeliveryAttempt, DeliveryResult, DeliveryStatus},
        message::NotificationMessage,
        provider::ProviderConfig,
        retry::FailoverConfig,
        validation::validate_payload,
    },
    providers::registry::ProviderRegistry,
    services::selector::ProviderSelector,
    utils::backoff_delay,
};

/// Delivers one notification, failing over across the channel's providers.
///
/// Attempts for a notification are strictly sequential. The whole chain,
/// selection and backoff included, is bounded by `FailoverConfig::budget`
/// independently of each provider's own call timeout.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    selector: ProviderSelector,
    breaker: CircuitBreaker,
    rate_limiter: RateLimiter,
    history: Arc<AttemptHistory>,
    audit: Arc<dyn AuditSink>,
    config: FailoverConfig,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        selector: ProviderSelector,
        breaker: CircuitBreaker,
        rate_limiter: RateLimiter,
        history: Arc<AttemptHistory>,
        audit: Arc<dyn AuditSink>,
        config: FailoverConfig,
    ) -> Self {
        Self {
            registry,
            selector,
            breaker,
            rate_limiter,
            history,
            audit,
            config,
        }
    }

    /// Surfaces only `RateLimited`, `InvalidRequest` or `FailoverExhausted`.
    pub async fn send(
        &self,
        message: &NotificationMessage,
    ) -> Result<DeliveryResult, DispatchError> {
        let channel = message.channel;
        let tenant_id = message.tenant_id.as_str();

        self.rate_limiter
            .check_and_increment(tenant_id, channel)
            .await?;

        validate_payload(channel, &message.payload)
            .map_err(|e| DispatchError::InvalidRequest(e.to_string()))?;

        let deadline = Instant::now() + self.config.budget;
        let mut attempts: Vec<DeliveryAttempt> = Vec::new();
        let mut tried: Vec<String> = Vec::new();
        let mut calls = 0;

        while calls < self.config.max_attempts {
            if Instant::now() >= deadline {
                debug!(notification_id = %message.id, "Failover budget spent before selection");
                break;
            }
            let provider = match self
                .selector
                .get_healthy_provider_before(channel, tenant_id, &tried, deadline)
                .await
            {
                Ok(provider) => provider,
                Err(DispatchError::FailoverExhausted { .. }) => break,
                Err(e) => return Err(e),
            };
            tried.push(provider.name.clone());

            if let Some(reason) = self.skip_reason(&provider).await {
                self.selector.release_probe_if_half_open(&provider.name).await;
                let attempt = DeliveryAttempt::skipped(&message.id, &provider.name, channel, reason);
                self.observe(&attempt);
                attempts.push(attempt);
                continue;
            }
            let Some(adapter) = self.registry.adapter(&provider.name) else {
                continue;
            };

            calls += 1;
            let call_deadline = deadline.min(Instant::now() + provider.timeout());
            let started = Instant::now();

            let outcome = match timeout_at(call_deadline, adapter.send(&message.payload)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(DispatchError::unavailable(
                    &provider.name,
                    format!("timed out after {}ms", started.elapsed().as_millis()),
                )),
            };
            let latency_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(receipt) => {
                    self.breaker.record_success(&provider.name).await;

                    let attempt = DeliveryAttempt::success(
                        &message.id,
                        &provider.name,
                        channel,
                        latency_ms,
                        receipt.vendor_response.clone(),
                    );
                    self.observe(&attempt);
                    attempts.push(attempt);

                    info!(
                        notification_id = %message.id,
                        provider = %provider.name,
                        channel = %channel,
                        attempt = calls,
                        latency_ms,
                        "Notification delivered"
                    );

                    return Ok(DeliveryResult {
                        notification_id: message.id.clone(),
                        provider: provider.name,
                        channel,
                        message_id: receipt.message_id,
                        status: receipt.status,
                        vendor_response: receipt.vendor_response,
                        delivered_at: Utc::now(),
                        attempts,
                    });
                }
                Err(DispatchError::InvalidRequest(reason)) => {
                    // The vendor answered; the payload is at fault, not the provider.
                    self.selector.release_probe_if_half_open(&provider.name).await;

                    let attempt = DeliveryAttempt::failure(
                        &message.id,
                        &provider.name,
                        channel,
                        latency_ms,
                        reason.clone(),
                    );
                    self.observe(&attempt);

                    warn!(
                        notification_id = %message.id,
                        provider = %provider.name,
                        error = %reason,
                        "Provider rejected notification"
                    );
                    return Err(DispatchError::InvalidRequest(reason));
                }
                Err(e) => {
                    self.breaker.record_failure(&provider.name).await;

                    let attempt = DeliveryAttempt::failure(
                        &message.id,
                        &provider.name,
                        channel,
                        latency_ms,
                        e.to_string(),
                    );
                    self.observe(&attempt);
                    attempts.push(attempt);

                    warn!(
                        notification_id = %message.id,
                        provider = %provider.name,
                        attempt = calls,
                        latency_ms,
                        error = %e,
                        "Delivery attempt failed, failing over"
                    );

                    if calls >= self.config.max_attempts {
                        break;
                    }

                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    let delay =
                        backoff_delay(self.config.base_backoff, calls - 1, self.config.max_backoff);
                    sleep(delay.min(remaining)).await;
                }
            }
        }

        warn!(
            notification_id = %message.id,
            channel = %channel,
            attempts = attempts.len(),
            "Failover exhausted"
        );

        Err(DispatchError::FailoverExhausted { channel, attempts })
    }

    /// Vendor-side status of a message accepted earlier by `provider`.
    pub async fn status(
        &self,
        provider: &str,
        message_id: &str,
    ) -> Result<DeliveryStatus, DispatchError> {
        let adapter = self
            .registry
            .adapter(provider)
            .ok_or_else(|| DispatchError::InvalidRequest(format!("Unknown provider '{}'", provider)))?;

        adapter.get_status(message_id).await
    }

    /// Why `provider` must be passed over without a call, if it must.
    async fn skip_reason(&self, provider: &ProviderConfig) -> Option<String> {
        let ceiling = provider.rate_limit?;
        if self
            .rate_limiter
            .try_acquire_provider(&provider.name, ceiling)
            .await
        {
            None
        } else {
            Some(format!("provider rate ceiling {} reached", ceiling))
        }
    }

    fn observe(&self, attempt: &DeliveryAttempt) {
        self.history.record(attempt);
        record_detached(&self.audit, attempt.clone());
    }
}

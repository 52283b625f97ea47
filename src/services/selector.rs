use std::{sync::Arc, time::Duration};

use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::{
    clients::{circuit_breaker::CircuitBreaker, health::HealthChecker, store::SharedStore},
    error::DispatchError,
    models::{
        circuit_breaker::CircuitState,
        provider::{Channel, ProviderConfig},
    },
    providers::registry::ProviderRegistry,
};

/// Picks the provider for the next delivery attempt on a channel.
///
/// Candidates are walked in preference order. A provider whose breaker is
/// unavailable or whose health probe fails is passed over. The winner is
/// remembered per channel as "last known healthy" so that subsequent calls can
/// skip probing while its health record is still fresh.
#[derive(Clone)]
pub struct ProviderSelector {
    registry: Arc<ProviderRegistry>,
    breaker: CircuitBreaker,
    health: HealthChecker,
    store: Arc<dyn SharedStore>,
    cache_ttl: Duration,
}

impl ProviderSelector {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        breaker: CircuitBreaker,
        health: HealthChecker,
        store: Arc<dyn SharedStore>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            breaker,
            health,
            store,
            cache_ttl,
        }
    }

    /// First usable provider for `channel` that is not in `exclude`.
    pub async fn get_healthy_provider(
        &self,
        channel: Channel,
        tenant_id: &str,
        exclude: &[String],
    ) -> Result<ProviderConfig, DispatchError> {
        self.select(channel, tenant_id, exclude, None).await
    }

    /// Like [`Self::get_healthy_provider`], but gives up once `deadline`
    /// passes. A health check still running at the deadline is abandoned and
    /// any half-open slot its candidate took is handed back, so callers must
    /// use this instead of cancelling a selection from the outside.
    pub async fn get_healthy_provider_before(
        &self,
        channel: Channel,
        tenant_id: &str,
        exclude: &[String],
        deadline: Instant,
    ) -> Result<ProviderConfig, DispatchError> {
        self.select(channel, tenant_id, exclude, Some(deadline)).await
    }

    async fn select(
        &self,
        channel: Channel,
        tenant_id: &str,
        exclude: &[String],
        deadline: Option<Instant>,
    ) -> Result<ProviderConfig, DispatchError> {
        if let Some(provider) = self.last_known_healthy(channel, exclude).await {
            debug!(
                provider = %provider.name,
                channel = %channel,
                tenant_id,
                "Using last known healthy provider"
            );
            return Ok(provider);
        }

        for candidate in self.registry.candidates(channel) {
            if exclude.contains(&candidate.name) {
                continue;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                debug!(channel = %channel, tenant_id, "Selection deadline passed");
                break;
            }

            match self.admit(&candidate, deadline).await {
                Ok(()) => {
                    self.remember(channel, &candidate.name).await;
                    debug!(
                        provider = %candidate.name,
                        channel = %channel,
                        tenant_id,
                        "Provider selected"
                    );
                    return Ok(candidate);
                }
                Err(e) => debug!(provider = %candidate.name, reason = %e, "Candidate passed over"),
            }
        }

        info!(channel = %channel, tenant_id, excluded = exclude.len(), "No usable provider left");
        Err(DispatchError::exhausted(channel))
    }

    /// Breaker gate followed by the (cached) health probe.
    async fn admit(
        &self,
        candidate: &ProviderConfig,
        deadline: Option<Instant>,
    ) -> Result<(), DispatchError> {
        if !self.breaker.is_available(&candidate.name).await {
            return Err(DispatchError::CircuitOpen {
                provider: candidate.name.clone(),
            });
        }

        let check = self.health.check_health(&candidate.name);
        let record = match deadline {
            Some(deadline) => match timeout_at(deadline, check).await {
                Ok(record) => record,
                Err(_) => {
                    self.release_probe_if_half_open(&candidate.name).await;
                    return Err(DispatchError::unavailable(
                        &candidate.name,
                        "health check outlived the selection deadline",
                    ));
                }
            },
            None => check.await,
        };
        if record.is_healthy {
            return Ok(());
        }

        // A half-open slot taken by `is_available` must not be held by a
        // candidate that will never be called.
        self.release_probe_if_half_open(&candidate.name).await;

        Err(DispatchError::unavailable(
            &candidate.name,
            record
                .last_error
                .unwrap_or_else(|| "health check failed".to_string()),
        ))
    }

    /// Hands back the half-open probe slot of a provider chosen but not used.
    pub async fn release_probe_if_half_open(&self, provider: &str) {
        let half_open = self
            .breaker
            .get_state(provider)
            .await
            .is_ok_and(|snapshot| snapshot.state == CircuitState::HalfOpen);

        if half_open {
            self.breaker.release_probe(provider).await;
        }
    }

    async fn last_known_healthy(
        &self,
        channel: Channel,
        exclude: &[String],
    ) -> Option<ProviderConfig> {
        let name = match self.store.get(&last_healthy_key(channel)).await {
            Ok(name) => name?,
            Err(e) => {
                warn!(channel = %channel, error = %e, "Selector cache unavailable");
                return None;
            }
        };

        if exclude.contains(&name) {
            return None;
        }

        let provider = self
            .registry
            .provider(&name)
            .filter(|p| p.channel == channel)?
            .clone();

        let closed = self
            .breaker
            .get_state(&name)
            .await
            .is_ok_and(|snapshot| snapshot.state == CircuitState::Closed);
        if !closed {
            return None;
        }

        self.health
            .cached(&name)
            .await
            .filter(|record| record.is_healthy)
            .map(|_| provider)
    }

    async fn remember(&self, channel: Channel, provider: &str) {
        if let Err(e) = self
            .store
            .set(&last_healthy_key(channel), provider, Some(self.cache_ttl))
            .await
        {
            warn!(channel = %channel, provider, error = %e, "Failed to cache selected provider");
        }
    }
}

fn last_healthy_key(channel: Channel) -> String {
    format!("selector:last_healthy:{}", channel)
}

use std::{collections::HashMap, sync::Arc, time::Instant};

use chrono::{SecondsFormat, Utc};
use tracing::{debug, warn};

use crate::{
    clients::{circuit_breaker::CircuitBreaker, history::AttemptHistory, store::SharedStore},
    models::{
        circuit_breaker::CircuitState,
        health::{HealthCheckConfig, HealthCheckResponse, HealthRecord, HealthStatus, ServiceHealth},
    },
    providers::registry::ProviderRegistry,
};

/// Probes providers out of band and caches the result in the shared store for
/// `interval`, so concurrent workers share one probe per provider per interval.
#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn SharedStore>,
    registry: Arc<ProviderRegistry>,
    history: Arc<AttemptHistory>,
    config: HealthCheckConfig,
}

impl HealthChecker {
    pub fn new(
        store: Arc<dyn SharedStore>,
        registry: Arc<ProviderRegistry>,
        history: Arc<AttemptHistory>,
        config: HealthCheckConfig,
    ) -> Self {
        Self {
            store,
            registry,
            history,
            config,
        }
    }

    /// Cached record if one is still fresh, otherwise a new probe.
    pub async fn check_health(&self, provider: &str) -> HealthRecord {
        if let Some(record) = self.cached(provider).await {
            debug!(provider, "Health record served from cache");
            return record;
        }

        let record = self.probe(provider).await;
        self.store_record(&record).await;
        record
    }

    /// Fresh cached record, without probing.
    pub async fn cached(&self, provider: &str) -> Option<HealthRecord> {
        let raw = match self.store.get(&health_key(provider)).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(provider, error = %e, "Health cache unavailable");
                return None;
            }
        };

        match serde_json::from_str::<HealthRecord>(&raw) {
            Ok(record) if record.is_fresh(self.config.interval) => Some(record),
            Ok(_) => None,
            Err(e) => {
                warn!(provider, error = %e, "Discarding unreadable health record");
                None
            }
        }
    }

    async fn probe(&self, provider: &str) -> HealthRecord {
        let diagnostics = self.history.diagnostics(provider);

        let Some(adapter) = self.registry.adapter(provider) else {
            return HealthRecord::unhealthy(provider, 0, "Provider is not registered".to_string())
                .with_diagnostics(diagnostics);
        };

        let started = Instant::now();
        let record = match tokio::time::timeout(self.config.probe_timeout, adapter.check_health())
            .await
        {
            Ok(record) => record,
            Err(_) => HealthRecord::unhealthy(
                provider,
                started.elapsed().as_millis() as u64,
                format!(
                    "Probe timed out after {}ms",
                    self.config.probe_timeout.as_millis()
                ),
            ),
        };

        let threshold_ms = self.config.latency_threshold.as_millis() as u64;
        let record = if record.is_healthy && record.latency_ms > threshold_ms {
            HealthRecord::unhealthy(
                provider,
                record.latency_ms,
                format!(
                    "Latency {}ms above threshold {}ms",
                    record.latency_ms, threshold_ms
                ),
            )
        } else {
            record
        };

        if record.is_healthy {
            debug!(provider, latency_ms = record.latency_ms, "Provider health check passed");
        } else {
            warn!(
                provider,
                latency_ms = record.latency_ms,
                error = record.last_error.as_deref().unwrap_or_default(),
                "Provider health check failed"
            );
        }

        record.with_diagnostics(diagnostics)
    }

    async fn store_record(&self, record: &HealthRecord) {
        let raw = match serde_json::to_string(record) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(provider = %record.provider, error = %e, "Failed to encode health record");
                return;
            }
        };

        if let Err(e) = self
            .store
            .set(&health_key(&record.provider), &raw, Some(self.config.interval))
            .await
        {
            warn!(provider = %record.provider, error = %e, "Failed to cache health record");
        }
    }

    /// Aggregate view for the status endpoint: the shared store plus every
    /// configured provider with its breaker state.
    pub async fn check_all(&self, breaker: &CircuitBreaker) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        checks.insert("shared_store".to_string(), self.check_store().await);

        for provider in self.registry.providers() {
            let record = self.check_health(&provider.name).await;
            let circuit = match breaker.get_state(&provider.name).await {
                Ok(snapshot) => snapshot.state,
                Err(e) => {
                    warn!(provider = %provider.name, error = %e, "Failed to check circuit breaker state");
                    CircuitState::Closed
                }
            };
            checks.insert(
                provider.name.clone(),
                ServiceHealth::from_provider(&record, circuit),
            );
        }

        let status = self.determine_overall_status(&checks);

        HealthCheckResponse {
            status,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            checks,
        }
    }

    async fn check_store(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.store.ping().await {
            Ok(_) => ServiceHealth::healthy(start.elapsed().as_millis() as u64),
            Err(e) => {
                warn!(error = %e, "Shared store ping failed");
                ServiceHealth::unhealthy(format!("Ping failed: {}", e))
            }
        }
    }

    /// Unhealthy when the store is down or a channel has no usable provider;
    /// degraded when any single provider is impaired.
    fn determine_overall_status(&self, checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
        let store_down = checks
            .get("shared_store")
            .is_some_and(|health| health.status == HealthStatus::Unhealthy);

        let channel_down = self.registry.channels().into_iter().any(|channel| {
            self.registry.candidates(channel).iter().all(|provider| {
                checks
                    .get(&provider.name)
                    .is_none_or(|health| health.status == HealthStatus::Unhealthy)
            })
        });

        let has_impaired = checks
            .values()
            .any(|health| health.status != HealthStatus::Healthy);

        if store_down || channel_down {
            HealthStatus::Unhealthy
        } else if has_impaired {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

fn health_key(provider: &str) -> String {
    format!("health:{}", provider)
}

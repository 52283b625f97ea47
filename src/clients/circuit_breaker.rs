use std::sync::Arc;

use anyhow::{Error, Result};
use chrono::{TimeZone, Utc};
use tracing::{debug, info, warn};

use crate::{
    clients::store::SharedStore,
    models::circuit_breaker::{CircuitBreakerConfig, CircuitSnapshot, CircuitState},
};

/// Per-provider breaker whose state lives entirely in the shared store, so
/// every worker sees the same view of each provider.
///
/// Keys per provider:
/// - `circuit:{p}:state` current state, written with compare-and-set
/// - `circuit:{p}:failures` consecutive failure counter (atomic increment)
/// - `circuit:{p}:last_failure_at` unix millis of the latest failure
/// - `circuit:{p}:probe` half-open probe slot, at most one holder
#[derive(Clone)]
pub struct CircuitBreaker {
    store: Arc<dyn SharedStore>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(store: Arc<dyn SharedStore>, config: CircuitBreakerConfig) -> Self {
        info!(
            failure_threshold = config.failure_threshold,
            reset_timeout_ms = config.reset_timeout.as_millis() as u64,
            "Circuit breaker initialized"
        );

        Self { store, config }
    }

    /// Whether a delivery attempt may go to `provider` right now.
    ///
    /// An open circuit whose reset timeout has elapsed moves to half-open and
    /// hands the probe slot to exactly one caller.
    pub async fn is_available(&self, provider: &str) -> bool {
        match self.check_available(provider).await {
            Ok(available) => available,
            Err(e) => {
                warn!(provider, error = %e, "Circuit state unreadable, allowing request");
                true
            }
        }
    }

    async fn check_available(&self, provider: &str) -> Result<bool, Error> {
        match self.read_state(provider).await? {
            CircuitState::Closed => Ok(true),
            CircuitState::Open => {
                if !self.reset_timeout_elapsed(provider).await? {
                    debug!(provider, "Circuit breaker is open, rejecting request");
                    return Ok(false);
                }

                let moved = self
                    .store
                    .compare_and_set(
                        &state_key(provider),
                        Some(CircuitState::Open.as_str()),
                        CircuitState::HalfOpen.as_str(),
                        None,
                    )
                    .await?;
                if moved {
                    info!(provider, "Circuit breaker attempting reset");
                }

                self.try_acquire_probe(provider).await
            }
            CircuitState::HalfOpen => self.try_acquire_probe(provider).await,
        }
    }

    async fn try_acquire_probe(&self, provider: &str) -> Result<bool, Error> {
        let acquired = self
            .store
            .compare_and_set(
                &probe_key(provider),
                None,
                "1",
                Some(self.config.reset_timeout),
            )
            .await?;

        debug!(provider, acquired, "Circuit breaker in half-open state");
        Ok(acquired)
    }

    /// Gives the half-open probe slot back without recording an outcome.
    pub async fn release_probe(&self, provider: &str) {
        if let Err(e) = self.store.delete(&probe_key(provider)).await {
            warn!(provider, error = %e, "Failed to release circuit probe slot");
        }
    }

    pub async fn record_success(&self, provider: &str) {
        if let Err(e) = self.try_record_success(provider).await {
            warn!(provider, error = %e, "Failed to record circuit success");
        }
    }

    async fn try_record_success(&self, provider: &str) -> Result<(), Error> {
        match self.read_state(provider).await? {
            CircuitState::HalfOpen => {
                let closed = self
                    .store
                    .compare_and_set(
                        &state_key(provider),
                        Some(CircuitState::HalfOpen.as_str()),
                        CircuitState::Closed.as_str(),
                        None,
                    )
                    .await?;
                self.store.delete(&failures_key(provider)).await?;
                self.store.delete(&probe_key(provider)).await?;

                if closed {
                    info!(provider, "Circuit breaker closed after successful recovery");
                }
            }
            CircuitState::Closed => {
                self.store.delete(&failures_key(provider)).await?;
            }
            // A call admitted before the circuit opened; the open state stands.
            CircuitState::Open => {}
        }

        Ok(())
    }

    pub async fn record_failure(&self, provider: &str) {
        if let Err(e) = self.try_record_failure(provider).await {
            warn!(provider, error = %e, "Failed to record circuit failure");
        }
    }

    async fn try_record_failure(&self, provider: &str) -> Result<(), Error> {
        let failures = self.store.increment(&failures_key(provider), None).await?;
        self.stamp_last_failure(provider).await?;

        match self.read_state(provider).await? {
            CircuitState::HalfOpen => {
                self.store
                    .set(&state_key(provider), CircuitState::Open.as_str(), None)
                    .await?;
                self.store.delete(&probe_key(provider)).await?;
                warn!(provider, "Circuit breaker reopened after failed recovery attempt");
            }
            CircuitState::Closed => {
                debug!(
                    provider,
                    failures = failures.value,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker failure recorded"
                );

                if failures.value >= self.config.failure_threshold {
                    let opened = self
                        .store
                        .compare_and_set(
                            &state_key(provider),
                            Some(CircuitState::Closed.as_str()),
                            CircuitState::Open.as_str(),
                            None,
                        )
                        .await?
                        || self
                            .store
                            .compare_and_set(
                                &state_key(provider),
                                None,
                                CircuitState::Open.as_str(),
                                None,
                            )
                            .await?;

                    if opened {
                        warn!(
                            provider,
                            failures = failures.value,
                            "Circuit breaker opened due to consecutive failures"
                        );
                    }
                }
            }
            CircuitState::Open => {}
        }

        Ok(())
    }

    pub async fn get_state(&self, provider: &str) -> Result<CircuitSnapshot, Error> {
        let state = self.read_state(provider).await?;
        let failure_count = self
            .store
            .get(&failures_key(provider))
            .await?
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let last_failure_at = self
            .last_failure_millis(provider)
            .await?
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

        Ok(CircuitSnapshot {
            provider: provider.to_string(),
            state,
            failure_count,
            last_failure_at,
        })
    }

    async fn read_state(&self, provider: &str) -> Result<CircuitState, Error> {
        let value = self.store.get(&state_key(provider)).await?;

        Ok(value
            .map(|s| CircuitState::from_string(&s))
            .unwrap_or(CircuitState::Closed))
    }

    async fn stamp_last_failure(&self, provider: &str) -> Result<(), Error> {
        let now = Utc::now().timestamp_millis().to_string();
        self.store
            .set(&last_failure_key(provider), &now, None)
            .await
    }

    async fn last_failure_millis(&self, provider: &str) -> Result<Option<i64>, Error> {
        Ok(self
            .store
            .get(&last_failure_key(provider))
            .await?
            .and_then(|v| v.parse::<i64>().ok()))
    }

    async fn reset_timeout_elapsed(&self, provider: &str) -> Result<bool, Error> {
        let Some(last_failure) = self.last_failure_millis(provider).await? else {
            return Ok(true);
        };

        let elapsed = Utc::now().timestamp_millis().saturating_sub(last_failure);
        Ok(elapsed >= self.config.reset_timeout.as_millis() as i64)
    }
}

fn state_key(provider: &str) -> String {
    format!("circuit:{}:state", provider)
}

fn failures_key(provider: &str) -> String {
    format!("circuit:{}:failures", provider)
}

fn last_failure_key(provider: &str) -> String {
    format!("circuit:{}:last_failure_at", provider)
}

fn probe_key(provider: &str) -> String {
    format!("circuit:{}:probe", provider)
}

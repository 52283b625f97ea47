use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::{
    clients::store::SharedStore,
    error::DispatchError,
    models::{provider::Channel, rate_limit::RateLimitConfig, rate_limit::RateWindow},
};

/// Fixed-window counters kept in the shared store.
///
/// The first increment in a window creates the key with a TTL equal to the
/// window length; the key expiring is the rollover.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn SharedStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Counts one dispatch for `(tenant, channel)` and fails once the window's
    /// ceiling has been passed.
    pub async fn check_and_increment(
        &self,
        tenant_id: &str,
        channel: Channel,
    ) -> Result<RateWindow, DispatchError> {
        let key = format!("ratelimit:{}:{}", tenant_id, channel);

        let Some(window) = self.increment(&key).await else {
            return Ok(RateWindow {
                count: 0,
                expires_in: self.config.window,
            });
        };

        if window.count > self.config.max_requests {
            debug!(
                tenant_id,
                channel = %channel,
                count = window.count,
                limit = self.config.max_requests,
                "Tenant rate limit exceeded"
            );
            return Err(DispatchError::RateLimited {
                tenant_id: tenant_id.to_string(),
                channel,
                limit: self.config.max_requests,
                retry_after: window.expires_in,
            });
        }

        Ok(window)
    }

    /// Takes one slot from a provider's own ceiling. Returns false when the
    /// provider is saturated for the current window.
    pub async fn try_acquire_provider(&self, provider: &str, ceiling: u64) -> bool {
        let key = format!("ratelimit:provider:{}", provider);

        match self.increment(&key).await {
            Some(window) if window.count > ceiling => {
                debug!(provider, count = window.count, ceiling, "Provider rate ceiling reached");
                false
            }
            _ => true,
        }
    }

    async fn increment(&self, key: &str) -> Option<RateWindow> {
        match self.store.increment(key, Some(self.config.window)).await {
            Ok(increment) => Some(RateWindow {
                count: increment.value,
                expires_in: increment.expires_in.unwrap_or(Duration::ZERO),
            }),
            Err(e) => {
                warn!(key, error = %e, "Rate limit store unavailable, allowing request");
                None
            }
        }
    }
}

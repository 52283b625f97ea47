use std::time::Duration;

use thiserror::Error;

use crate::models::{delivery::DeliveryAttempt, provider::Channel};

/// Outcome classes for a dispatch.
///
/// `CircuitOpen` and `Unavailable` stay inside the dispatcher and only ever
/// trigger failover. Callers of `Dispatcher::send` see `InvalidRequest`,
/// `RateLimited` or `FailoverExhausted`.
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("rate limited for tenant {tenant_id} on {channel}: ceiling {limit}, retry in {retry_after:?}")]
    RateLimited {
        tenant_id: String,
        channel: Channel,
        limit: u64,
        retry_after: Duration,
    },

    #[error("circuit open for provider {provider}")]
    CircuitOpen { provider: String },

    #[error("provider {provider} unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("failover exhausted on {channel} after {} attempt(s)", attempts.len())]
    FailoverExhausted {
        channel: Channel,
        attempts: Vec<DeliveryAttempt>,
    },
}

impl DispatchError {
    pub fn unavailable(provider: &str, reason: impl Into<String>) -> Self {
        DispatchError::Unavailable {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    pub fn exhausted(channel: Channel) -> Self {
        DispatchError::FailoverExhausted {
            channel,
            attempts: Vec::new(),
        }
    }

    /// Whether a later redelivery of the same message could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DispatchError::InvalidRequest(_))
    }

    /// Whether the dispatcher should move on to the next provider.
    pub fn is_failover_eligible(&self) -> bool {
        matches!(
            self,
            DispatchError::CircuitOpen { .. } | DispatchError::Unavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_provider_faults_fail_over() {
        assert!(DispatchError::unavailable("a", "500").is_failover_eligible());
        assert!(
            DispatchError::CircuitOpen {
                provider: "a".into()
            }
            .is_failover_eligible()
        );
        assert!(!DispatchError::InvalidRequest("bad".into()).is_failover_eligible());
        assert!(!DispatchError::exhausted(Channel::Sms).is_failover_eligible());
    }

    #[test]
    fn invalid_requests_are_never_retried() {
        assert!(!DispatchError::InvalidRequest("bad".into()).is_retryable());
        assert!(DispatchError::exhausted(Channel::Email).is_retryable());
    }
}

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// Cross-provider failover bounds for a single notification.
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    pub max_attempts: u32,
    /// Wall-clock ceiling for the whole failover chain.
    pub budget: Duration,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            budget: Duration::from_millis(2_000),
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(400),
        }
    }
}

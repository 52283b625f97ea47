use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u64,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 1_000,
            window: Duration::from_secs(60),
        }
    }
}

/// Counter state of one fixed window after an increment.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateWindow {
    pub count: u64,
    pub expires_in: Duration,
}

use anyhow::{Error, Result};
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::models::retry::RetryConfig;

pub fn init_tracing() -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}

/// `base * 2^attempt`, capped at `max`.
pub fn backoff_delay(base: Duration, attempt: u32, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(20));
    base.saturating_mul(factor).min(max)
}

/// Scales `delay` by a random factor in `[1 - spread, 1 + spread]`.
pub fn jittered(delay: Duration, spread: f64) -> Duration {
    let jitter = rand::random_range(-spread..=spread);
    Duration::from_millis((delay.as_millis() as f64 * (1.0 + jitter)).max(0.0) as u64)
}

pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_when(config, |_| true, operation).await
}

/// Like `retry_with_backoff`, but only errors accepted by `should_retry` are
/// retried; any other error is returned immediately.
pub async fn retry_when<F, Fut, T, E, P>(
    config: &RetryConfig,
    should_retry: P,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        attempt,
                        max_attempts = config.max_attempts,
                        "Retry succeeded"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if !should_retry(&e) {
                    return Err(e);
                }

                if attempt >= config.max_attempts {
                    warn!(
                        max_attempts = config.max_attempts,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(e);
                }

                debug!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms,
                    "Retry attempt failed, backing off"
                );

                sleep(jittered(Duration::from_millis(delay_ms), 0.1)).await;

                delay_ms = std::cmp::min(
                    delay_ms.saturating_mul(config.backoff_multiplier),
                    config.max_delay_ms,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let base = Duration::from_millis(50);
        let max = Duration::from_millis(400);

        assert_eq!(backoff_delay(base, 0, max), Duration::from_millis(50));
        assert_eq!(backoff_delay(base, 1, max), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 3, max), Duration::from_millis(400));
        assert_eq!(backoff_delay(base, 30, max), max);
    }

    #[test]
    fn jitter_stays_in_spread() {
        for _ in 0..100 {
            let delay = jittered(Duration::from_millis(1_000), 0.2);
            assert!(delay >= Duration::from_millis(800) && delay <= Duration::from_millis(1_200));
        }
    }
}

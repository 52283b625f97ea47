use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::{
    circuit_breaker::CircuitBreakerConfig,
    health::HealthCheckConfig,
    provider::ProviderConfig,
    queue::{QueueConfig, RetryTiers},
    rate_limit::RateLimitConfig,
    retry::{FailoverConfig, RetryConfig},
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    /// Prefix of the per-tier retry queues.
    #[serde(default = "default_retry_queue_name")]
    pub retry_queue_name: String,
    /// Comma-separated retry delays, one retry queue each.
    #[serde(default = "default_retry_delay_tiers_ms")]
    pub retry_delay_tiers_ms: Vec<u64>,
    #[serde(default = "default_dead_letter_queue_name")]
    pub dead_letter_queue_name: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,

    pub redis_url: String,

    /// Audit attempts go to the log when unset.
    #[serde(default)]
    pub database_url: Option<String>,

    /// JSON file holding the provider list.
    #[serde(default = "default_providers_path")]
    pub providers_path: String,

    #[serde(default = "default_failure_threshold")]
    pub circuit_breaker_failure_threshold: u64,
    #[serde(default = "default_reset_timeout_ms")]
    pub circuit_breaker_reset_timeout_ms: u64,

    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: u64,
    #[serde(default = "default_rate_limit_window_seconds")]
    pub rate_limit_window_seconds: u64,

    #[serde(default = "default_health_check_interval_seconds")]
    pub health_check_interval_seconds: u64,
    #[serde(default = "default_health_probe_timeout_ms")]
    pub health_probe_timeout_ms: u64,
    #[serde(default = "default_health_latency_threshold_ms")]
    pub health_latency_threshold_ms: u64,

    #[serde(default = "default_failover_budget_ms")]
    pub failover_budget_ms: u64,
    #[serde(default = "default_failover_max_attempts")]
    pub failover_max_attempts: u32,
    #[serde(default = "default_failover_base_backoff_ms")]
    pub failover_base_backoff_ms: u64,
    #[serde(default = "default_failover_max_backoff_ms")]
    pub failover_max_backoff_ms: u64,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_queue_batch_size")]
    pub queue_batch_size: usize,
    #[serde(default = "default_queue_max_retries")]
    pub queue_max_retries: u32,
    #[serde(default = "default_queue_retry_base_delay_ms")]
    pub queue_retry_base_delay_ms: u64,
    #[serde(default = "default_queue_retry_max_delay_ms")]
    pub queue_retry_max_delay_ms: u64,
    #[serde(default = "default_idempotency_ttl_seconds")]
    pub idempotency_ttl_seconds: u64,
    #[serde(default = "default_queue_poll_interval_ms")]
    pub queue_poll_interval_ms: u64,
    /// Messages handled in parallel within one batch of one consumer loop.
    #[serde(default = "default_queue_concurrency")]
    pub queue_concurrency: usize,
    #[serde(default = "default_queue_batch_safety_margin_ms")]
    pub queue_batch_safety_margin_ms: u64,
    #[serde(default = "default_queue_processing_ttl_seconds")]
    pub queue_processing_ttl_seconds: u64,

    /// Independent consumer loops. In-flight deliveries peak at
    /// `worker_concurrency * queue_concurrency`.
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        Ok(config)
    }

    /// Reads the provider list from `providers_path`.
    pub fn load_providers(&self) -> Result<Vec<ProviderConfig>, Error> {
        let raw = std::fs::read_to_string(&self.providers_path)
            .map_err(|e| anyhow!("Failed to read providers file '{}': {}", self.providers_path, e))?;

        let providers: Vec<ProviderConfig> = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("Invalid providers file '{}': {}", self.providers_path, e))?;

        if providers.is_empty() {
            return Err(anyhow!("No providers configured in '{}'", self.providers_path));
        }

        Ok(providers)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_failure_threshold,
            reset_timeout: Duration::from_millis(self.circuit_breaker_reset_timeout_ms),
        }
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.rate_limit_max_requests,
            window: Duration::from_secs(self.rate_limit_window_seconds),
        }
    }

    pub fn health_check_config(&self) -> HealthCheckConfig {
        HealthCheckConfig {
            interval: Duration::from_secs(self.health_check_interval_seconds),
            probe_timeout: Duration::from_millis(self.health_probe_timeout_ms),
            latency_threshold: Duration::from_millis(self.health_latency_threshold_ms),
        }
    }

    pub fn failover_config(&self) -> FailoverConfig {
        FailoverConfig {
            max_attempts: self.failover_max_attempts,
            budget: Duration::from_millis(self.failover_budget_ms),
            base_backoff: Duration::from_millis(self.failover_base_backoff_ms),
            max_backoff: Duration::from_millis(self.failover_max_backoff_ms),
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            batch_size: self.queue_batch_size,
            max_retries: self.queue_max_retries,
            retry_base_delay: Duration::from_millis(self.queue_retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(self.queue_retry_max_delay_ms),
            concurrency: self.queue_concurrency.max(1),
            batch_safety_margin: Duration::from_millis(self.queue_batch_safety_margin_ms),
            idempotency_ttl: Duration::from_secs(self.idempotency_ttl_seconds),
            processing_ttl: Duration::from_secs(self.queue_processing_ttl_seconds),
        }
    }

    pub fn retry_tiers(&self) -> RetryTiers {
        RetryTiers::from_millis(&self.retry_delay_tiers_ms)
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms)
    }
}

fn default_queue_name() -> String {
    "notifications".to_string()
}

fn default_retry_queue_name() -> String {
    "notifications.retry".to_string()
}

fn default_retry_delay_tiers_ms() -> Vec<u64> {
    RetryTiers::default()
        .delays()
        .iter()
        .map(|tier| tier.as_millis() as u64)
        .collect()
}

fn default_dead_letter_queue_name() -> String {
    "notifications.failed".to_string()
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_providers_path() -> String {
    "providers.json".to_string()
}

fn default_failure_threshold() -> u64 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

fn default_rate_limit_max_requests() -> u64 {
    1_000
}

fn default_rate_limit_window_seconds() -> u64 {
    60
}

fn default_health_check_interval_seconds() -> u64 {
    30
}

fn default_health_probe_timeout_ms() -> u64 {
    5_000
}

fn default_health_latency_threshold_ms() -> u64 {
    2_000
}

fn default_failover_budget_ms() -> u64 {
    2_000
}

fn default_failover_max_attempts() -> u32 {
    3
}

fn default_failover_base_backoff_ms() -> u64 {
    50
}

fn default_failover_max_backoff_ms() -> u64 {
    400
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    100
}

fn default_max_retry_delay_ms() -> u64 {
    1_000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

fn default_queue_batch_size() -> usize {
    10
}

fn default_queue_max_retries() -> u32 {
    3
}

fn default_queue_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_queue_retry_max_delay_ms() -> u64 {
    300_000
}

fn default_idempotency_ttl_seconds() -> u64 {
    86_400
}

fn default_queue_poll_interval_ms() -> u64 {
    500
}

fn default_queue_concurrency() -> usize {
    4
}

fn default_queue_batch_safety_margin_ms() -> u64 {
    5_000
}

fn default_queue_processing_ttl_seconds() -> u64 {
    300
}

fn default_worker_concurrency() -> usize {
    1
}

fn default_server_port() -> u16 {
    8080
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let mut env = vec![
            ("rabbitmq_url".to_string(), "amqp://localhost:5672".to_string()),
            ("redis_url".to_string(), "redis://localhost:6379".to_string()),
        ];
        env.extend(vars.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        envy::from_iter(env).unwrap()
    }

    #[test]
    fn test_batch_concurrency_is_independent_of_worker_loops() {
        let config = config_from(&[("worker_concurrency", "3"), ("queue_concurrency", "8")]);

        assert_eq!(config.worker_concurrency, 3);
        assert_eq!(config.queue_config().concurrency, 8);
    }

    #[test]
    fn test_queue_timings_come_from_env() {
        let config = config_from(&[
            ("queue_batch_safety_margin_ms", "1500"),
            ("queue_processing_ttl_seconds", "45"),
            ("retry_delay_tiers_ms", "2000,500"),
        ]);
        let queue = config.queue_config();

        assert_eq!(queue.batch_safety_margin, Duration::from_millis(1_500));
        assert_eq!(queue.processing_ttl, Duration::from_secs(45));
        assert_eq!(
            config.retry_tiers().delays(),
            &[Duration::from_millis(500), Duration::from_secs(2)]
        );
    }

    #[test]
    fn test_defaults_keep_one_loop_and_default_tiers() {
        let config = config_from(&[]);

        assert_eq!(config.worker_concurrency, 1);
        assert_eq!(config.queue_config().concurrency, 4);
        assert_eq!(config.queue_config().processing_ttl, Duration::from_secs(300));
        assert_eq!(config.retry_tiers(), RetryTiers::default());
    }
}

use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::circuit_breaker::CircuitState;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Rolling delivery statistics for one provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Diagnostics {
    pub success_rate: f64,
    pub average_latency_ms: u64,
    pub sample_size: usize,
}

/// Cached liveness record for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub provider: String,
    pub is_healthy: bool,
    pub latency_ms: u64,
    pub last_checked_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(default)]
    pub diagnostics: Diagnostics,
}

impl HealthRecord {
    pub fn healthy(provider: &str, latency_ms: u64) -> Self {
        Self {
            provider: provider.to_string(),
            is_healthy: true,
            latency_ms,
            last_checked_at: Utc::now(),
            last_error: None,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn unhealthy(provider: &str, latency_ms: u64, error: String) -> Self {
        Self {
            provider: provider.to_string(),
            is_healthy: false,
            latency_ms,
            last_checked_at: Utc::now(),
            last_error: Some(error),
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.last_checked_at);
        age.to_std().map(|age| age < ttl).unwrap_or(true)
    }
}

#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub latency_threshold: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            latency_threshold: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: HealthStatus,
    pub timestamp: String,
    pub checks: HashMap<String, ServiceHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceHealth {
    pub fn healthy(response_time_ms: u64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            response_time_ms: Some(response_time_ms),
            circuit_breaker: None,
            error: None,
        }
    }

    pub fn unhealthy(error: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            response_time_ms: None,
            circuit_breaker: None,
            error: Some(error),
        }
    }

    /// Folds a provider's health record and breaker state into one entry.
    pub fn from_provider(record: &HealthRecord, circuit: CircuitState) -> Self {
        let status = match (record.is_healthy, circuit) {
            (true, CircuitState::Closed) => HealthStatus::Healthy,
            (false, CircuitState::Open) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };

        Self {
            status,
            response_time_ms: Some(record.latency_ms),
            circuit_breaker: Some(circuit.as_str().to_string()),
            error: record.last_error.clone(),
        }
    }
}

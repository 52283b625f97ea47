use std::sync::{Arc, Mutex};

use anyhow::{Error, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::delivery::DeliveryAttempt;

/// Destination for the per-attempt audit trail.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, attempt: &DeliveryAttempt) -> Result<(), Error>;
}

/// Hands `attempt` to the sink on a background task. Persistence failures are
/// logged and never reach the delivery path.
pub fn record_detached(sink: &Arc<dyn AuditSink>, attempt: DeliveryAttempt) {
    let sink = Arc::clone(sink);
    tokio::spawn(async move {
        if let Err(e) = sink.record(&attempt).await {
            warn!(
                notification_id = %attempt.notification_id,
                provider = %attempt.provider,
                error = %e,
                "Failed to write audit log"
            );
        }
    });
}

/// Emits attempts as structured log events.
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, attempt: &DeliveryAttempt) -> Result<(), Error> {
        info!(
            notification_id = %attempt.notification_id,
            provider = %attempt.provider,
            channel = %attempt.channel,
            outcome = attempt.outcome.as_str(),
            latency_ms = attempt.latency_ms,
            error = attempt.error.as_deref().unwrap_or_default(),
            "Delivery attempt"
        );
        Ok(())
    }
}

/// Keeps attempts in memory.
#[derive(Default)]
pub struct MemoryAuditSink {
    attempts: Mutex<Vec<DeliveryAttempt>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> Vec<DeliveryAttempt> {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, attempt: &DeliveryAttempt) -> Result<(), Error> {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(attempt.clone());
        Ok(())
    }
}

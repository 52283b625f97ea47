use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

use crate::{clients::audit::AuditSink, models::delivery::DeliveryAttempt};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS delivery_attempts (
    id BIGSERIAL PRIMARY KEY,
    notification_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    channel TEXT NOT NULL,
    outcome TEXT NOT NULL,
    latency_ms BIGINT NOT NULL,
    provider_response JSONB,
    error_message TEXT,
    attempted_at TIMESTAMPTZ NOT NULL
)
"#;

/// Postgres sink for the delivery-attempt audit trail.
pub struct DatabaseClient {
    client: Client,
}

impl DatabaseClient {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection closed");
            }
        });

        client
            .batch_execute(CREATE_TABLE)
            .await
            .map_err(|e| anyhow!("Failed to prepare audit table: {}", e))?;

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }
}

#[async_trait]
impl AuditSink for DatabaseClient {
    async fn record(&self, attempt: &DeliveryAttempt) -> Result<(), Error> {
        let latency_ms = attempt.latency_ms as i64;

        self.client
            .execute(
                r#"
                INSERT INTO delivery_attempts (
                    notification_id,
                    provider,
                    channel,
                    outcome,
                    latency_ms,
                    provider_response,
                    error_message,
                    attempted_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
                &[
                    &attempt.notification_id,
                    &attempt.provider,
                    &attempt.channel.as_str(),
                    &attempt.outcome.as_str(),
                    &latency_ms,
                    &attempt.provider_response,
                    &attempt.error,
                    &attempt.attempted_at,
                ],
            )
            .await
            .map_err(|e| {
                error!(
                    error = %e,
                    notification_id = %attempt.notification_id,
                    "Failed to write audit log to database"
                );
                anyhow!("Database write failed: {}", e)
            })?;

        debug!(
            notification_id = %attempt.notification_id,
            outcome = attempt.outcome.as_str(),
            "Audit log written to database"
        );

        Ok(())
    }
}

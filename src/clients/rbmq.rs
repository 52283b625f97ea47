use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties,
    options::{
        BasicAckOptions, BasicGetOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, ShortString},
};
use tracing::{error, info, warn};

use crate::{
    clients::queue::{MessageQueue, QueuedMessage},
    config::Config,
    models::{
        message::{DlqMessage, NotificationMessage},
        queue::RetryTiers,
    },
};

/// RabbitMQ-backed queue.
///
/// Delayed re-enqueue goes through one retry queue per delay tier, named
/// `{retry_queue_name}.{ms}ms`. Each tier queue has a queue-level
/// `x-message-ttl` and dead-letters expired messages back into the main
/// queue. RabbitMQ only expires messages at the head of a queue, so mixing
/// delays in one queue would hold short retries behind long ones.
pub struct RabbitMqClient {
    channel: Channel,
    queue_name: String,
    retry_queue_name: String,
    retry_tiers: RetryTiers,
    dead_letter_queue_name: String,
}

impl RabbitMqClient {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ");

        let connection = Connection::connect(&config.rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set up QoS: {}", e))?;

        Self::declare(&channel, &config.queue_name, FieldTable::default()).await?;
        Self::declare(&channel, &config.dead_letter_queue_name, FieldTable::default()).await?;

        let retry_tiers = config.retry_tiers();
        for tier in retry_tiers.delays() {
            Self::declare(
                &channel,
                &RetryTiers::queue_name(&config.retry_queue_name, *tier),
                tier_arguments(&config.queue_name, *tier),
            )
            .await?;
        }

        info!(
            queue = %config.queue_name,
            retry_queue = %config.retry_queue_name,
            retry_tiers = retry_tiers.delays().len(),
            dead_letter_queue = %config.dead_letter_queue_name,
            "RabbitMQ queues declared"
        );

        Ok(Self {
            channel,
            queue_name: config.queue_name.clone(),
            retry_queue_name: config.retry_queue_name.clone(),
            retry_tiers,
            dead_letter_queue_name: config.dead_letter_queue_name.clone(),
        })
    }

    async fn declare(channel: &Channel, name: &str, arguments: FieldTable) -> Result<(), Error> {
        channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                arguments,
            )
            .await
            .map_err(|e| anyhow!("Failed to declare queue '{}': {}", name, e))?;
        Ok(())
    }

    pub async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), Error> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|e| anyhow!("Failed to reject message: {}", e))?;

        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), Error> {
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                properties.with_delivery_mode(2),
            )
            .await
            .map_err(|e| anyhow!("Failed to publish message to '{}': {}", queue, e))?;

        Ok(())
    }
}

#[async_trait]
impl MessageQueue for RabbitMqClient {
    async fn pull(&self, max: usize) -> Result<Vec<QueuedMessage>, Error> {
        let mut batch = Vec::with_capacity(max);

        while batch.len() < max {
            let Some(message) = self
                .channel
                .basic_get(&self.queue_name, BasicGetOptions::default())
                .await
                .map_err(|e| anyhow!("Failed to pull from '{}': {}", self.queue_name, e))?
            else {
                break;
            };

            let delivery_tag = message.delivery.delivery_tag;
            match serde_json::from_slice::<NotificationMessage>(&message.delivery.data) {
                Ok(notification) => batch.push(QueuedMessage {
                    receipt: delivery_tag,
                    message: notification,
                }),
                Err(e) => {
                    error!(delivery_tag, error = %e, "Dropping undecodable queue message");
                    self.reject(delivery_tag, false).await?;
                }
            }
        }

        Ok(batch)
    }

    async fn ack(&self, receipt: u64) -> Result<(), Error> {
        self.channel
            .basic_ack(receipt, BasicAckOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to acknowledge message: {}", e))?;

        Ok(())
    }

    async fn requeue(&self, message: &NotificationMessage, delay: Duration) -> Result<(), Error> {
        let payload = serde_json::to_vec(message)?;

        match self.retry_tiers.tier_for(delay) {
            Some(tier) => {
                if tier < delay {
                    warn!(
                        notification_id = %message.id,
                        delay_ms = delay.as_millis() as u64,
                        tier_ms = tier.as_millis() as u64,
                        "Retry delay exceeds the longest tier"
                    );
                }
                let queue = RetryTiers::queue_name(&self.retry_queue_name, tier);
                self.publish(&queue, &payload, BasicProperties::default()).await
            }
            None => {
                self.publish(&self.queue_name, &payload, BasicProperties::default())
                    .await
            }
        }
    }

    async fn dead_letter(&self, message: &DlqMessage) -> Result<(), Error> {
        let payload = serde_json::to_vec(message)?;

        self.publish(
            &self.dead_letter_queue_name,
            &payload,
            BasicProperties::default(),
        )
        .await
    }
}

/// Arguments of a tier queue: a fixed TTL, then back to `main_queue`.
fn tier_arguments(main_queue: &str, tier: Duration) -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert(
        ShortString::from("x-message-ttl"),
        AMQPValue::LongLongInt(tier.as_millis() as i64),
    );
    arguments.insert(
        ShortString::from("x-dead-letter-exchange"),
        AMQPValue::LongString("".into()),
    );
    arguments.insert(
        ShortString::from("x-dead-letter-routing-key"),
        AMQPValue::LongString(main_queue.into()),
    );
    arguments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_queue_expires_into_main_queue() {
        let arguments = tier_arguments("notifications", Duration::from_secs(5));
        let inner = arguments.inner();

        assert_eq!(
            inner.get(&ShortString::from("x-message-ttl")),
            Some(&AMQPValue::LongLongInt(5_000))
        );
        assert_eq!(
            inner.get(&ShortString::from("x-dead-letter-routing-key")),
            Some(&AMQPValue::LongString("notifications".into()))
        );
        assert_eq!(
            inner.get(&ShortString::from("x-dead-letter-exchange")),
            Some(&AMQPValue::LongString("".into()))
        );
    }
}

use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result};
use futures_util::{StreamExt, stream};
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::{
    clients::{
        queue::{MessageQueue, QueuedMessage},
        store::SharedStore,
    },
    error::DispatchError,
    models::{
        message::{DlqMessage, NotificationMessage},
        queue::{BatchReport, QueueConfig},
        status::{IdempotencyStatus, NotificationStatus},
    },
    services::dispatcher::Dispatcher,
    utils::{backoff_delay, jittered},
};

const RETRY_JITTER: f64 = 0.2;

/// Remaining execution time for one consumer invocation.
#[derive(Debug, Clone, Copy)]
pub struct TimeBudget {
    deadline: Instant,
}

impl TimeBudget {
    pub fn new(total: Duration) -> Self {
        Self {
            deadline: Instant::now() + total,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Delivered,
    Retried,
    DeadLettered,
    Skipped,
}

/// Pulls notifications off the queue and settles each one: delivered, retried
/// with backoff, or dead-lettered.
///
/// Every message resolves on its own. One message failing never blocks or
/// rolls back the rest of its batch.
pub struct QueueConsumer {
    queue: Arc<dyn MessageQueue>,
    dispatcher: Dispatcher,
    store: Arc<dyn SharedStore>,
    config: QueueConfig,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        dispatcher: Dispatcher,
        store: Arc<dyn SharedStore>,
        config: QueueConfig,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            store,
            config,
        }
    }

    /// Pulls batches while the budget leaves room for one more and the queue
    /// still has work. Anything not pulled stays for a later invocation.
    pub async fn run_invocation(&self, budget: &TimeBudget) -> Result<BatchReport, Error> {
        let mut report = BatchReport::default();

        while budget.remaining() > self.config.batch_safety_margin {
            let batch = self.process_batch().await?;
            report.merge(&batch);

            if batch.pulled == 0 {
                break;
            }
        }

        if budget.remaining() <= self.config.batch_safety_margin {
            debug!(
                remaining_ms = budget.remaining().as_millis() as u64,
                "Stopping before next batch, time budget nearly spent"
            );
        }

        Ok(report)
    }

    /// Worker loop for a long-running process. Sleeps `idle_wait` whenever the
    /// queue is empty or unreachable.
    pub async fn run(&self, idle_wait: Duration) {
        info!(
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "Queue consumer started"
        );

        loop {
            match self.process_batch().await {
                Ok(report) if report.pulled > 0 => {
                    info!(
                        pulled = report.pulled,
                        delivered = report.delivered,
                        retried = report.retried,
                        dead_lettered = report.dead_lettered,
                        skipped = report.skipped,
                        unsettled = report.unsettled,
                        "Batch processed"
                    );
                }
                Ok(_) => sleep(idle_wait).await,
                Err(e) => {
                    error!(error = %e, "Failed to pull batch");
                    sleep(idle_wait).await;
                }
            }
        }
    }

    pub async fn process_batch(&self) -> Result<BatchReport, Error> {
        let batch = self.queue.pull(self.config.batch_size).await?;

        let mut report = BatchReport {
            pulled: batch.len(),
            ..Default::default()
        };

        let outcomes: Vec<Result<Disposition, Error>> = stream::iter(batch)
            .map(|queued| self.handle(queued))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Ok(Disposition::Delivered) => report.delivered += 1,
                Ok(Disposition::Retried) => report.retried += 1,
                Ok(Disposition::DeadLettered) => report.dead_lettered += 1,
                Ok(Disposition::Skipped) => report.skipped += 1,
                Err(e) => {
                    error!(error = %e, "Message left unsettled");
                    report.unsettled += 1;
                }
            }
        }

        Ok(report)
    }

    async fn handle(&self, queued: QueuedMessage) -> Result<Disposition, Error> {
        let message = &queued.message;

        info!(
            notification_id = %message.id,
            tenant_id = %message.tenant_id,
            channel = %message.channel,
            retry_count = message.retry_count,
            status = %NotificationStatus::Processing,
            "Processing notification message"
        );

        match self.claim(message).await {
            Claim::Acquired => {}
            Claim::Done(status) => {
                info!(
                    notification_id = %message.id,
                    status = status.as_str(),
                    "Message already settled, skipping"
                );
                self.queue.ack(queued.receipt).await?;
                return Ok(Disposition::Skipped);
            }
            Claim::Busy => {
                // Outlives the claim so a crashed claimant cannot lose the message.
                info!(
                    notification_id = %message.id,
                    "Message is being processed elsewhere, deferring"
                );
                self.queue
                    .requeue(&message.deferred(), self.config.processing_ttl)
                    .await?;
                self.queue.ack(queued.receipt).await?;
                return Ok(Disposition::Skipped);
            }
            Claim::Superseded => {
                info!(
                    notification_id = %message.id,
                    "Claimant scheduled its own retry, dropping deferred copy"
                );
                self.queue.ack(queued.receipt).await?;
                return Ok(Disposition::Skipped);
            }
        }

        match self.dispatcher.send(message).await {
            Ok(result) => {
                self.mark(message, IdempotencyStatus::Sent).await;
                self.queue.ack(queued.receipt).await?;

                debug!(
                    notification_id = %message.id,
                    provider = %result.provider,
                    message_id = %result.message_id,
                    status = %NotificationStatus::Delivered,
                    "Notification settled"
                );
                Ok(Disposition::Delivered)
            }
            Err(DispatchError::InvalidRequest(reason)) => {
                self.dead_letter(&queued, format!("invalid request: {}", reason))
                    .await
            }
            Err(DispatchError::RateLimited { retry_after, .. }) => {
                // Caller-side throttle: wait the window out without spending a retry.
                let delay = retry_after.max(self.retry_delay(message.retry_count));
                self.requeue(&queued, message.clone(), delay).await
            }
            Err(e) => self.retry_or_dead_letter(&queued, e.to_string()).await,
        }
    }

    async fn retry_or_dead_letter(
        &self,
        queued: &QueuedMessage,
        reason: String,
    ) -> Result<Disposition, Error> {
        let next = queued.message.next_retry(reason.clone());

        if next.retry_count >= self.config.max_retries {
            return self
                .dead_letter(
                    queued,
                    format!("retries exhausted after {} attempts: {}", next.retry_count, reason),
                )
                .await;
        }

        let delay = self.retry_delay(next.retry_count);
        self.requeue(queued, next, delay).await
    }

    async fn requeue(
        &self,
        queued: &QueuedMessage,
        next: NotificationMessage,
        delay: Duration,
    ) -> Result<Disposition, Error> {
        let requeued = self.queue.requeue(&next, delay).await;
        // Released either way so the next copy, retry or redelivery, can claim it.
        self.mark(&queued.message, IdempotencyStatus::Failed).await;
        requeued?;
        self.queue.ack(queued.receipt).await?;

        warn!(
            notification_id = %next.id,
            retry_count = next.retry_count,
            delay_ms = delay.as_millis() as u64,
            error = next.last_error.as_deref().unwrap_or_default(),
            status = %NotificationStatus::Retrying,
            "Notification scheduled for retry"
        );

        Ok(Disposition::Retried)
    }

    /// Publishes to the dead-letter destination at most once per notification.
    async fn dead_letter(
        &self,
        queued: &QueuedMessage,
        reason: String,
    ) -> Result<Disposition, Error> {
        let message = &queued.message;
        let guard = dead_letter_key(&message.id);

        let first = match self
            .store
            .compare_and_set(&guard, None, "1", Some(self.config.idempotency_ttl))
            .await
        {
            Ok(first) => first,
            Err(e) => {
                warn!(notification_id = %message.id, error = %e, "Dead-letter guard unavailable");
                true
            }
        };

        if first {
            let dlq_message = DlqMessage::new(message.clone(), reason.clone());
            if let Err(e) = self.queue.dead_letter(&dlq_message).await {
                if let Err(e) = self.store.delete(&guard).await {
                    warn!(notification_id = %message.id, error = %e, "Failed to release dead-letter guard");
                }
                self.mark(message, IdempotencyStatus::Failed).await;
                return Err(e);
            }

            error!(
                notification_id = %message.id,
                tenant_id = %message.tenant_id,
                retry_count = message.retry_count,
                reason = %reason,
                status = %NotificationStatus::DeadLettered,
                "Notification moved to dead-letter queue"
            );
        } else {
            info!(notification_id = %message.id, "Notification already dead-lettered");
        }

        self.mark(message, IdempotencyStatus::DeadLettered).await;
        self.queue.ack(queued.receipt).await?;

        Ok(Disposition::DeadLettered)
    }

    /// `base * 2^retry_count`, jittered and capped.
    fn retry_delay(&self, retry_count: u32) -> Duration {
        let delay = backoff_delay(
            self.config.retry_base_delay,
            retry_count,
            self.config.retry_max_delay,
        );
        jittered(delay, RETRY_JITTER).min(self.config.retry_max_delay)
    }

    async fn claim(&self, message: &NotificationMessage) -> Claim {
        let key = idempotency_key(&message.id);

        let current = match self.store.get(&key).await {
            Ok(value) => IdempotencyStatus::from_value(value.as_deref()),
            Err(e) => {
                warn!(notification_id = %message.id, error = %e, "Idempotency store unavailable, processing anyway");
                return Claim::Acquired;
            }
        };

        let expected = match current {
            IdempotencyStatus::Sent | IdempotencyStatus::DeadLettered => {
                return Claim::Done(current);
            }
            IdempotencyStatus::Processing => return Claim::Busy,
            // A failed claimant always leaves a live copy behind: its retry,
            // or the unacknowledged original.
            IdempotencyStatus::Failed if message.deferred => return Claim::Superseded,
            IdempotencyStatus::NotFound => None,
            IdempotencyStatus::Failed => Some(IdempotencyStatus::Failed.as_str()),
        };

        match self
            .store
            .compare_and_set(
                &key,
                expected,
                IdempotencyStatus::Processing.as_str(),
                Some(self.config.processing_ttl),
            )
            .await
        {
            Ok(true) => Claim::Acquired,
            Ok(false) => Claim::Busy,
            Err(e) => {
                warn!(notification_id = %message.id, error = %e, "Failed to claim message, processing anyway");
                Claim::Acquired
            }
        }
    }

    async fn mark(&self, message: &NotificationMessage, status: IdempotencyStatus) {
        if let Err(e) = self
            .store
            .set(
                &idempotency_key(&message.id),
                status.as_str(),
                Some(self.config.idempotency_ttl),
            )
            .await
        {
            warn!(
                notification_id = %message.id,
                status = status.as_str(),
                error = %e,
                "Failed to record idempotency status"
            );
        }
    }
}

enum Claim {
    Acquired,
    Done(IdempotencyStatus),
    Busy,
    Superseded,
}

fn idempotency_key(notification_id: &str) -> String {
    format!("idempotency:{}", notification_id)
}

fn dead_letter_key(notification_id: &str) -> String {
    format!("idempotency:{}:dead_lettered", notification_id)
}

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::{Duration, Instant},
};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;

use crate::models::message::{DlqMessage, NotificationMessage};

/// A message claimed from the queue, identified by its delivery receipt.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub receipt: u64,
    pub message: NotificationMessage,
}

/// Durable work queue with at-least-once delivery. A pulled message that is
/// never acknowledged becomes visible again to another consumer.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn pull(&self, max: usize) -> Result<Vec<QueuedMessage>, Error>;

    async fn ack(&self, receipt: u64) -> Result<(), Error>;

    /// Enqueues `message` again, visible after `delay`.
    async fn requeue(&self, message: &NotificationMessage, delay: Duration) -> Result<(), Error>;

    async fn dead_letter(&self, message: &DlqMessage) -> Result<(), Error>;
}

#[derive(Default)]
struct Inner {
    ready: VecDeque<(Instant, NotificationMessage)>,
    in_flight: HashMap<u64, NotificationMessage>,
    dead_letters: Vec<DlqMessage>,
    next_receipt: u64,
}

/// Process-local queue with delayed visibility.
#[derive(Default)]
pub struct InMemoryQueue {
    inner: Mutex<Inner>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn publish(&self, message: NotificationMessage) {
        self.lock().ready.push_back((Instant::now(), message));
    }

    /// Returns every unacknowledged message to the queue, as a broker does
    /// when a consumer's visibility window lapses.
    pub fn release_unacked(&self) {
        let mut inner = self.lock();
        let now = Instant::now();
        let released: Vec<NotificationMessage> = inner.in_flight.drain().map(|(_, m)| m).collect();
        inner
            .ready
            .extend(released.into_iter().map(|message| (now, message)));
    }

    pub fn pending(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn pending_messages(&self) -> Vec<NotificationMessage> {
        self.lock().ready.iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn dead_letters(&self) -> Vec<DlqMessage> {
        self.lock().dead_letters.clone()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn pull(&self, max: usize) -> Result<Vec<QueuedMessage>, Error> {
        let mut inner = self.lock();
        let now = Instant::now();
        let mut batch = Vec::new();
        let mut waiting = VecDeque::new();

        while let Some((visible_at, message)) = inner.ready.pop_front() {
            if batch.len() < max && visible_at <= now {
                inner.next_receipt += 1;
                let receipt = inner.next_receipt;
                inner.in_flight.insert(receipt, message.clone());
                batch.push(QueuedMessage { receipt, message });
            } else {
                waiting.push_back((visible_at, message));
            }
        }
        inner.ready = waiting;

        Ok(batch)
    }

    async fn ack(&self, receipt: u64) -> Result<(), Error> {
        self.lock()
            .in_flight
            .remove(&receipt)
            .map(|_| ())
            .ok_or_else(|| anyhow!("Unknown delivery receipt {}", receipt))
    }

    async fn requeue(&self, message: &NotificationMessage, delay: Duration) -> Result<(), Error> {
        self.lock()
            .ready
            .push_back((Instant::now() + delay, message.clone()));
        Ok(())
    }

    async fn dead_letter(&self, message: &DlqMessage) -> Result<(), Error> {
        self.lock().dead_letters.push(message.clone());
        Ok(())
    }
}

use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Messages processed in parallel within one batch.
    pub concurrency: usize,
    /// Minimum remaining time required before pulling another batch.
    pub batch_safety_margin: Duration,
    pub idempotency_ttl: Duration,
    /// How long a worker's claim on a message holds off other workers.
    pub processing_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(300),
            concurrency: 4,
            batch_safety_margin: Duration::from_secs(5),
            idempotency_ttl: Duration::from_secs(86_400),
            processing_ttl: Duration::from_secs(300),
        }
    }
}

/// The fixed delays a broker-side retry can wait out, shortest first.
///
/// Every tier has a queue of its own whose messages all share one TTL, so a
/// long delay never sits in front of a short one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryTiers(Vec<Duration>);

impl RetryTiers {
    pub fn new(delays: impl IntoIterator<Item = Duration>) -> Self {
        let mut delays: Vec<Duration> = delays.into_iter().filter(|d| !d.is_zero()).collect();
        delays.sort();
        delays.dedup();
        Self(delays)
    }

    pub fn from_millis(delays: &[u64]) -> Self {
        Self::new(delays.iter().copied().map(Duration::from_millis))
    }

    pub fn delays(&self) -> &[Duration] {
        &self.0
    }

    /// Shortest tier that waits at least `delay`, or the longest tier when
    /// `delay` exceeds them all. `None` means no wait is needed.
    pub fn tier_for(&self, delay: Duration) -> Option<Duration> {
        if delay.is_zero() {
            return None;
        }
        self.0
            .iter()
            .copied()
            .find(|tier| *tier >= delay)
            .or_else(|| self.0.last().copied())
    }

    pub fn queue_name(prefix: &str, tier: Duration) -> String {
        format!("{}.{}ms", prefix, tier.as_millis())
    }
}

impl Default for RetryTiers {
    fn default() -> Self {
        Self::from_millis(&[1_000, 5_000, 15_000, 30_000, 60_000, 120_000, 300_000])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub pulled: usize,
    pub delivered: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub skipped: usize,
    /// Left unacknowledged after a queue or store error; the broker redelivers.
    pub unsettled: usize,
}

impl BatchReport {
    pub fn merge(&mut self, other: &BatchReport) {
        self.pulled += other.pulled;
        self.delivered += other.delivered;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
        self.skipped += other.skipped;
        self.unsettled += other.unsettled;
    }
}

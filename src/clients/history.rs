use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use crate::models::{
    delivery::{AttemptOutcome, DeliveryAttempt},
    health::Diagnostics,
};

const DEFAULT_CAPACITY: usize = 100;

struct Sample {
    success: bool,
    latency_ms: u64,
}

/// Recent attempt outcomes per provider, bounded per provider.
pub struct AttemptHistory {
    capacity: usize,
    samples: Mutex<HashMap<String, VecDeque<Sample>>>,
}

impl Default for AttemptHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl AttemptHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, attempt: &DeliveryAttempt) {
        // Skipped candidates were never called.
        if attempt.outcome == AttemptOutcome::Skipped {
            return;
        }

        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        let ring = samples.entry(attempt.provider.clone()).or_default();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(Sample {
            success: attempt.is_success(),
            latency_ms: attempt.latency_ms,
        });
    }

    pub fn diagnostics(&self, provider: &str) -> Diagnostics {
        let samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        let Some(ring) = samples.get(provider).filter(|ring| !ring.is_empty()) else {
            return Diagnostics::default();
        };

        let sample_size = ring.len();
        let successes = ring.iter().filter(|s| s.success).count();
        let total_latency: u64 = ring.iter().map(|s| s.latency_ms).sum();

        Diagnostics {
            success_rate: successes as f64 / sample_size as f64,
            average_latency_ms: total_latency / sample_size as u64,
            sample_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::provider::Channel;

    #[test]
    fn diagnostics_reflect_recent_window() {
        let history = AttemptHistory::with_capacity(4);

        for _ in 0..4 {
            history.record(&DeliveryAttempt::failure("n", "a", Channel::Sms, 100, "x".into()));
        }
        history.record(&DeliveryAttempt::success(
            "n",
            "a",
            Channel::Sms,
            20,
            serde_json::json!({}),
        ));

        let diagnostics = history.diagnostics("a");
        assert_eq!(diagnostics.sample_size, 4);
        assert!((diagnostics.success_rate - 0.25).abs() < f64::EPSILON);
        assert_eq!(diagnostics.average_latency_ms, 80);
    }

    #[test]
    fn skipped_attempts_are_ignored() {
        let history = AttemptHistory::default();
        history.record(&DeliveryAttempt::skipped("n", "a", Channel::Sms, "ceiling".into()));
        assert_eq!(history.diagnostics("a").sample_size, 0);
    }
}

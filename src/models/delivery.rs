use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::models::provider::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failure,
    /// Candidate passed over without a call, e.g. at its own rate ceiling.
    Skipped,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Failure => "failure",
            AttemptOutcome::Skipped => "skipped",
        }
    }
}

/// Audit record for a single provider attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub notification_id: String,
    pub provider: String,
    pub channel: Channel,
    pub attempted_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_response: Option<JsonValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryAttempt {
    pub fn success(
        notification_id: &str,
        provider: &str,
        channel: Channel,
        latency_ms: u64,
        provider_response: JsonValue,
    ) -> Self {
        Self {
            notification_id: notification_id.to_string(),
            provider: provider.to_string(),
            channel,
            attempted_at: Utc::now(),
            outcome: AttemptOutcome::Success,
            latency_ms,
            provider_response: Some(provider_response),
            error: None,
        }
    }

    pub fn failure(
        notification_id: &str,
        provider: &str,
        channel: Channel,
        latency_ms: u64,
        error: String,
    ) -> Self {
        Self {
            notification_id: notification_id.to_string(),
            provider: provider.to_string(),
            channel,
            attempted_at: Utc::now(),
            outcome: AttemptOutcome::Failure,
            latency_ms,
            provider_response: None,
            error: Some(error),
        }
    }

    pub fn skipped(notification_id: &str, provider: &str, channel: Channel, reason: String) -> Self {
        Self {
            outcome: AttemptOutcome::Skipped,
            ..Self::failure(notification_id, provider, channel, 0, reason)
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

/// Vendor-reported state of an accepted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Accepted,
    Queued,
    Sent,
    Delivered,
    Failed,
    Unknown,
}

impl DeliveryStatus {
    pub fn from_vendor(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "accepted" | "processed" => DeliveryStatus::Accepted,
            "queued" | "sending" | "scheduled" => DeliveryStatus::Queued,
            "sent" => DeliveryStatus::Sent,
            "delivered" | "delivered_to_handset" | "read" => DeliveryStatus::Delivered,
            "failed" | "undelivered" | "bounce" | "bounced" | "dropped" | "rejected" => {
                DeliveryStatus::Failed
            }
            _ => DeliveryStatus::Unknown,
        }
    }
}

/// What an adapter hands back for an accepted send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub status: DeliveryStatus,
    pub vendor_response: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub notification_id: String,
    pub provider: String,
    pub channel: Channel,
    pub message_id: String,
    pub status: DeliveryStatus,
    pub vendor_response: JsonValue,
    pub delivered_at: DateTime<Utc>,
    pub attempts: Vec<DeliveryAttempt>,
}

use std::fmt::{Display, Formatter, Result};

use serde::{Deserialize, Serialize};

/// Lifecycle of a queued notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Processing,
    Delivered,
    Retrying,
    DeadLettered,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyStatus {
    NotFound,
    Processing,
    Sent,
    Failed,
    DeadLettered,
}

impl IdempotencyStatus {
    pub fn from_value(value: Option<&str>) -> Self {
        match value {
            None => IdempotencyStatus::NotFound,
            Some("processing") => IdempotencyStatus::Processing,
            Some("sent") => IdempotencyStatus::Sent,
            Some("failed") => IdempotencyStatus::Failed,
            Some("dead_lettered") => IdempotencyStatus::DeadLettered,
            Some(_) => IdempotencyStatus::NotFound,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            IdempotencyStatus::NotFound => "not_found",
            IdempotencyStatus::Processing => "processing",
            IdempotencyStatus::Sent => "sent",
            IdempotencyStatus::Failed => "failed",
            IdempotencyStatus::DeadLettered => "dead_lettered",
        }
    }
}

impl Display for NotificationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            NotificationStatus::Pending => write!(f, "pending"),
            NotificationStatus::Processing => write!(f, "processing"),
            NotificationStatus::Delivered => write!(f, "delivered"),
            NotificationStatus::Retrying => write!(f, "retrying"),
            NotificationStatus::DeadLettered => write!(f, "dead_lettered"),
        }
    }
}

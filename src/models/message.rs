use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::models::provider::Channel;

/// Content already rendered by the template layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderedPayload {
    /// Email address, E.164 phone number or device token depending on channel.
    pub recipient: String,

    /// Email subject or push title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    pub body: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,

    #[serde(default)]
    pub data: HashMap<String, String>,
}

impl RenderedPayload {
    pub fn new(recipient: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            subject: None,
            body: body.into(),
            html_body: None,
            data: HashMap::new(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_html_body(mut self, html_body: impl Into<String>) -> Self {
        self.html_body = Some(html_body.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub id: String,
    pub channel: Channel,
    pub tenant_id: String,
    pub payload: RenderedPayload,

    #[serde(default)]
    pub retry_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Set on the copy put back while another worker held the claim. Such a
    /// copy yields to the claimant's own retry.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deferred: bool,
}

impl NotificationMessage {
    pub fn new(channel: Channel, tenant_id: impl Into<String>, payload: RenderedPayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel,
            tenant_id: tenant_id.into(),
            payload,
            retry_count: 0,
            last_error: None,
            deferred: false,
        }
    }

    /// Copy scheduled for another pass with the retry count bumped.
    pub fn next_retry(&self, error: String) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            last_error: Some(error),
            deferred: false,
            ..self.clone()
        }
    }

    /// Copy that waits out another worker's claim.
    pub fn deferred(&self) -> Self {
        Self {
            deferred: true,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqMessage {
    pub original_message: NotificationMessage,
    pub failure_reason: String,
    pub failed_at: String,
}

impl DlqMessage {
    pub fn new(original_message: NotificationMessage, failure_reason: String) -> Self {
        Self {
            original_message,
            failure_reason,
            failed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

use std::sync::Arc;

use anyhow::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, info};

use crate::{
    error::DispatchError,
    models::{
        delivery::{DeliveryStatus, SendReceipt},
        health::HealthRecord,
        message::RenderedPayload,
        provider::{Channel, ProviderConfig},
        retry::RetryConfig,
    },
    providers::{
        ProviderAdapter,
        http::{
            VendorError, adapter_retry_config, base_url, build_client, call_with_retry,
            check_payload, is_success, probe, read_json,
        },
    },
};

const DEFAULT_BASE_URL: &str = "https://api.sendgrid.com";

/// Email through the SendGrid v3 mail send API.
pub struct SendGridAdapter {
    config: ProviderConfig,
    http_client: Client,
    base_url: String,
    api_key: String,
    sender: String,
    retry_config: RetryConfig,
}

impl SendGridAdapter {
    pub fn build(
        config: &ProviderConfig,
        retry: &RetryConfig,
    ) -> Result<Arc<dyn ProviderAdapter>, Error> {
        let adapter = Self {
            http_client: build_client(config)?,
            base_url: base_url(config, DEFAULT_BASE_URL),
            api_key: config.require_api_key()?.to_string(),
            sender: config.require_sender()?.to_string(),
            retry_config: adapter_retry_config(config, retry),
            config: config.clone(),
        };

        info!(provider = %config.name, "SendGrid adapter initialized");
        Ok(Arc::new(adapter))
    }

    fn request_body(&self, payload: &RenderedPayload) -> JsonValue {
        let mut content = vec![json!({ "type": "text/plain", "value": payload.body })];
        if let Some(html) = &payload.html_body {
            content.push(json!({ "type": "text/html", "value": html }));
        }

        json!({
            "personalizations": [{ "to": [{ "email": payload.recipient }] }],
            "from": { "email": self.sender },
            "subject": payload.subject,
            "content": content,
            "custom_args": payload.data,
        })
    }
}

#[async_trait]
impl ProviderAdapter for SendGridAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, payload: &RenderedPayload) -> Result<SendReceipt, DispatchError> {
        check_payload(&self.config, payload)?;

        let url = format!("{}/v3/mail/send", self.base_url);
        let body = self.request_body(payload);
        let (url, body) = (&url, &body);

        debug!(provider = %self.config.name, "Sending email via SendGrid");

        call_with_retry(&self.config.name, &self.retry_config, || async move {
            let response = self
                .http_client
                .post(url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await?;

            let message_id = response
                .headers()
                .get("x-message-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let (_, vendor_response) = read_json(response).await?;

            Ok::<_, VendorError>(SendReceipt {
                message_id: message_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                status: DeliveryStatus::Accepted,
                vendor_response,
            })
        })
        .await
    }

    async fn get_status(&self, message_id: &str) -> Result<DeliveryStatus, DispatchError> {
        let url = format!("{}/v3/messages/{}", self.base_url, message_id);
        let url = &url;

        call_with_retry(&self.config.name, &self.retry_config, || async move {
            let response = self
                .http_client
                .get(url)
                .bearer_auth(&self.api_key)
                .send()
                .await?;
            let (_, body) = read_json(response).await?;

            Ok::<_, VendorError>(
                body.get("status")
                    .and_then(|s| s.as_str())
                    .map(DeliveryStatus::from_vendor)
                    .unwrap_or(DeliveryStatus::Unknown),
            )
        })
        .await
    }

    async fn check_health(&self) -> HealthRecord {
        let request = self
            .http_client
            .get(format!("{}/v3/scopes", self.base_url))
            .bearer_auth(&self.api_key);

        probe(&self.config.name, request, is_success).await
    }
}

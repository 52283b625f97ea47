use std::sync::Arc;

use anyhow::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
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

const DEFAULT_BASE_URL: &str = "https://api.mailgun.net";

/// Email through the Mailgun messages API. `account` holds the sending domain.
pub struct MailgunAdapter {
    config: ProviderConfig,
    http_client: Client,
    base_url: String,
    api_key: String,
    domain: String,
    sender: String,
    retry_config: RetryConfig,
}

impl MailgunAdapter {
    pub fn build(
        config: &ProviderConfig,
        retry: &RetryConfig,
    ) -> Result<Arc<dyn ProviderAdapter>, Error> {
        let adapter = Self {
            http_client: build_client(config)?,
            base_url: base_url(config, DEFAULT_BASE_URL),
            api_key: config.require_api_key()?.to_string(),
            domain: config.require_account()?.to_string(),
            sender: config.require_sender()?.to_string(),
            retry_config: adapter_retry_config(config, retry),
            config: config.clone(),
        };

        info!(provider = %config.name, domain = %adapter.domain, "Mailgun adapter initialized");
        Ok(Arc::new(adapter))
    }

    fn form(&self, payload: &RenderedPayload) -> Vec<(String, String)> {
        let mut form = vec![
            ("from".to_string(), self.sender.clone()),
            ("to".to_string(), payload.recipient.clone()),
            ("subject".to_string(), payload.subject.clone().unwrap_or_default()),
            ("text".to_string(), payload.body.clone()),
        ];
        if let Some(html) = &payload.html_body {
            form.push(("html".to_string(), html.clone()));
        }
        for (key, value) in &payload.data {
            form.push((format!("v:{}", key), value.clone()));
        }
        form
    }
}

#[async_trait]
impl ProviderAdapter for MailgunAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, payload: &RenderedPayload) -> Result<SendReceipt, DispatchError> {
        check_payload(&self.config, payload)?;

        let url = format!("{}/v3/{}/messages", self.base_url, self.domain);
        let form = self.form(payload);
        let (url, form) = (&url, &form);

        debug!(provider = %self.config.name, "Sending email via Mailgun");

        call_with_retry(&self.config.name, &self.retry_config, || async move {
            let response = self
                .http_client
                .post(url)
                .basic_auth("api", Some(&self.api_key))
                .form(form)
                .send()
                .await?;
            let (_, vendor_response) = read_json(response).await?;

            let message_id = vendor_response
                .get("id")
                .and_then(|id| id.as_str())
                .map(|id| id.trim_matches(|c| c == '<' || c == '>').to_string())
                .ok_or_else(|| VendorError::Failed("Mailgun response missing id".to_string()))?;

            Ok::<_, VendorError>(SendReceipt {
                message_id,
                status: DeliveryStatus::Queued,
                vendor_response,
            })
        })
        .await
    }

    async fn get_status(&self, message_id: &str) -> Result<DeliveryStatus, DispatchError> {
        let url = format!("{}/v3/{}/events", self.base_url, self.domain);
        let url = &url;

        call_with_retry(&self.config.name, &self.retry_config, || async move {
            let response = self
                .http_client
                .get(url)
                .basic_auth("api", Some(&self.api_key))
                .query(&[("message-id", message_id), ("limit", "1")])
                .send()
                .await?;
            let (_, body) = read_json(response).await?;

            Ok::<_, VendorError>(
                body.get("items")
                    .and_then(|items| items.get(0))
                    .and_then(|item| item.get("event"))
                    .and_then(|event| event.as_str())
                    .map(DeliveryStatus::from_vendor)
                    .unwrap_or(DeliveryStatus::Unknown),
            )
        })
        .await
    }

    async fn check_health(&self) -> HealthRecord {
        let request = self
            .http_client
            .get(format!("{}/v3/domains/{}", self.base_url, self.domain))
            .basic_auth("api", Some(&self.api_key));

        probe(&self.config.name, request, is_success).await
    }
}

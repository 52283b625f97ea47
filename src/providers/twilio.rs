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

const DEFAULT_BASE_URL: &str = "https://api.twilio.com";

/// SMS through the Twilio Messages API. `account` is the account SID and
/// `api_key` the auth token.
pub struct TwilioAdapter {
    config: ProviderConfig,
    http_client: Client,
    account_url: String,
    account_sid: String,
    auth_token: String,
    sender: String,
    retry_config: RetryConfig,
}

impl TwilioAdapter {
    pub fn build(
        config: &ProviderConfig,
        retry: &RetryConfig,
    ) -> Result<Arc<dyn ProviderAdapter>, Error> {
        let account_sid = config.require_account()?.to_string();
        let adapter = Self {
            http_client: build_client(config)?,
            account_url: format!(
                "{}/2010-04-01/Accounts/{}",
                base_url(config, DEFAULT_BASE_URL),
                account_sid
            ),
            auth_token: config.require_api_key()?.to_string(),
            sender: config.require_sender()?.to_string(),
            retry_config: adapter_retry_config(config, retry),
            account_sid,
            config: config.clone(),
        };

        info!(provider = %config.name, "Twilio adapter initialized");
        Ok(Arc::new(adapter))
    }
}

#[async_trait]
impl ProviderAdapter for TwilioAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, payload: &RenderedPayload) -> Result<SendReceipt, DispatchError> {
        check_payload(&self.config, payload)?;

        let url = format!("{}/Messages.json", self.account_url);
        let form = [
            ("To", payload.recipient.as_str()),
            ("From", self.sender.as_str()),
            ("Body", payload.body.as_str()),
        ];
        let (url, form) = (&url, &form);

        debug!(provider = %self.config.name, "Sending SMS via Twilio");

        call_with_retry(&self.config.name, &self.retry_config, || async move {
            let response = self
                .http_client
                .post(url)
                .basic_auth(&self.account_sid, Some(&self.auth_token))
                .form(form)
                .send()
                .await?;
            let (_, vendor_response) = read_json(response).await?;

            let message_id = vendor_response
                .get("sid")
                .and_then(|sid| sid.as_str())
                .map(str::to_string)
                .ok_or_else(|| VendorError::Failed("Twilio response missing sid".to_string()))?;
            let status = vendor_response
                .get("status")
                .and_then(|s| s.as_str())
                .map(DeliveryStatus::from_vendor)
                .unwrap_or(DeliveryStatus::Queued);

            Ok::<_, VendorError>(SendReceipt {
                message_id,
                status,
                vendor_response,
            })
        })
        .await
    }

    async fn get_status(&self, message_id: &str) -> Result<DeliveryStatus, DispatchError> {
        let url = format!("{}/Messages/{}.json", self.account_url, message_id);
        let url = &url;

        call_with_retry(&self.config.name, &self.retry_config, || async move {
            let response = self
                .http_client
                .get(url)
                .basic_auth(&self.account_sid, Some(&self.auth_token))
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
            .get(format!("{}.json", self.account_url))
            .basic_auth(&self.account_sid, Some(&self.auth_token));

        probe(&self.config.name, request, is_success).await
    }
}
